//! Public types for the Tuile API.

mod change;
mod fingerprint;
mod query;
mod role;
mod rows;
mod scope;
mod table;

pub use change::{ChangeEvent, ChangeOperation};
pub use fingerprint::Fingerprint;
pub use query::{Embed, Filter, Order, Row, RowId, Select};
pub use role::{Permissions, Role};
pub use rows::{
    Chantier, ChantierInput, ChantierStatus, Configuration, ConfigurationPatch, Devis,
    DevisOption, Lead, LeadOption, devis_status, lead_status,
};
pub use scope::{InvalidationReason, InvalidationSignal, Scope};
pub use table::Table;
