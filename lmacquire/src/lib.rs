//! # lmacquire - Coordinateur d'acquisition
//!
//! Transforme un identifiant de piste en artefact `Ready`, avec au plus un
//! téléchargement par identifiant à un instant donné, quel que soit le
//! nombre de clients qui le demandent.
//!
//! ```rust,ignore
//! let coordinator = Coordinator::new(store, fetcher, AcquireSettings::default());
//! let entry = coordinator.ensure_cached(&TrackId::new("dQw4w9WgXcQ")?).await?;
//! ```

pub mod coordinator;
pub mod error;
pub mod events;

#[cfg(feature = "lmconfig")]
pub mod config_ext;

pub use coordinator::{AcquireSettings, Coordinator, Interest, Outcome};
pub use error::AcquireError;
pub use events::{AcquireEvent, TrackStatus};

#[cfg(feature = "lmconfig")]
pub use config_ext::AcquireConfigExt;
