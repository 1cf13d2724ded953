//! Typed rows of the back-office schema.
//!
//! Row types mirror what the backend returns; fields the views may leave
//! out of a projection are `#[serde(default)]`. Write payloads
//! ([`ChantierInput`], [`ConfigurationPatch`]) are separate types so that
//! an update never sends columns the form did not own.

use serde::{Deserialize, Serialize};

use super::RowId;

/// Lead statuses used by the pipeline chart.
pub mod lead_status {
    pub const NOUVEAU: &str = "nouveau";
    pub const CONTACTE: &str = "contacte";
    pub const QUALIFIE: &str = "qualifie";
    pub const DEVIS_ENVOYE: &str = "devis_envoye";
    pub const ACCEPTE: &str = "accepte";
    pub const REFUSE: &str = "refuse";
    pub const PERDU: &str = "perdu";
}

/// Quote statuses the statistics read.
pub mod devis_status {
    pub const ACCEPTE: &str = "accepte";
    pub const PAYES: &str = "payes";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: RowId,
    pub nom: String,
    #[serde(default)]
    pub prenom: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub code_postal: Option<String>,
    #[serde(default)]
    pub statut: String,
    #[serde(default)]
    pub type_projet: Option<String>,
    #[serde(default)]
    pub budget_estime: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Lead {
    /// "Nom Prénom", trimmed when the first name is missing.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.nom, self.prenom.as_deref().unwrap_or_default())
            .trim()
            .to_string()
    }
}

/// Lead as listed in the chantier form's picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadOption {
    pub id: RowId,
    pub nom: String,
    #[serde(default)]
    pub prenom: Option<String>,
    #[serde(default)]
    pub type_projet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Devis {
    pub id: RowId,
    #[serde(default)]
    pub numero: String,
    #[serde(default)]
    pub client_nom: String,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub client_telephone: Option<String>,
    #[serde(default)]
    pub client_adresse: Option<String>,
    #[serde(default)]
    pub lead_id: Option<RowId>,
    #[serde(default)]
    pub montant_ht: f64,
    #[serde(default)]
    pub montant_ttc: f64,
    #[serde(default)]
    pub tva_pct: f64,
    #[serde(default)]
    pub statut: String,
    #[serde(default)]
    pub date_creation: Option<String>,
    #[serde(default)]
    pub date_validite: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Quote as listed in the chantier form's picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevisOption {
    pub id: RowId,
    pub numero: String,
    pub client_nom: String,
    #[serde(default)]
    pub montant_ttc: f64,
}

/// Construction-site statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChantierStatus {
    #[default]
    Planifie,
    EnCours,
    Termine,
    Annule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chantier {
    pub id: RowId,
    pub nom_client: String,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub type_projet: Option<String>,
    #[serde(default)]
    pub statut: String,
    #[serde(default)]
    pub avancement_pct: Option<f64>,
    #[serde(default)]
    pub date_debut: Option<String>,
    #[serde(default)]
    pub date_fin_prevue: Option<String>,
    #[serde(default)]
    pub date_fin_reelle: Option<String>,
    #[serde(default)]
    pub lead_id: Option<RowId>,
    #[serde(default)]
    pub devis_id: Option<RowId>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Embedded quote (`select=*,devis(*)`).
    #[serde(default)]
    pub devis: Option<Devis>,
}

/// Insert/update payload for a chantier.
///
/// Serializes every column, with `null` for cleared optional fields, which
/// is what both an insert and a full-form update expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChantierInput {
    pub lead_id: Option<RowId>,
    pub devis_id: Option<RowId>,
    pub nom_client: String,
    pub type_projet: Option<String>,
    pub adresse: Option<String>,
    pub statut: ChantierStatus,
    pub avancement_pct: f64,
    pub date_debut: Option<String>,
    pub date_fin_prevue: Option<String>,
    pub date_fin_reelle: Option<String>,
    pub notes: Option<String>,
}

impl Default for ChantierInput {
    fn default() -> Self {
        Self {
            lead_id: None,
            devis_id: None,
            nom_client: String::new(),
            type_projet: None,
            adresse: None,
            statut: ChantierStatus::Planifie,
            avancement_pct: 0.0,
            date_debut: None,
            date_fin_prevue: None,
            date_fin_reelle: None,
            notes: None,
        }
    }
}

impl ChantierInput {
    pub fn new(nom_client: impl Into<String>) -> Self {
        Self {
            nom_client: nom_client.into(),
            ..Self::default()
        }
    }

    /// Form state for editing an existing chantier.
    pub fn from_chantier(chantier: &Chantier) -> Self {
        Self {
            lead_id: chantier.lead_id.clone(),
            devis_id: chantier
                .devis_id
                .clone()
                .or_else(|| chantier.devis.as_ref().map(|d| d.id.clone())),
            nom_client: chantier.nom_client.clone(),
            type_projet: chantier.type_projet.clone(),
            adresse: chantier.adresse.clone(),
            statut: serde_json::from_value(serde_json::Value::String(chantier.statut.clone()))
                .unwrap_or_default(),
            avancement_pct: chantier.avancement_pct.unwrap_or_default(),
            date_debut: chantier.date_debut.clone(),
            date_fin_prevue: chantier.date_fin_prevue.clone(),
            date_fin_reelle: chantier.date_fin_reelle.clone(),
            notes: chantier.notes.clone(),
        }
    }

    /// Fill the client name and project type from the selected lead.
    ///
    /// Local form state only; nothing is written until the form is saved.
    pub fn prefill_from_lead(&mut self, lead: &LeadOption) {
        self.lead_id = Some(lead.id.clone());
        self.nom_client = format!("{} {}", lead.nom, lead.prenom.as_deref().unwrap_or_default())
            .trim()
            .to_string();
        if let Some(kind) = &lead.type_projet {
            self.type_projet = Some(kind.clone());
        }
    }

    /// Pick the quote automatically when the lead has exactly one.
    pub fn select_single_devis(&mut self, options: &[DevisOption]) {
        if let [only] = options {
            self.devis_id = Some(only.id.clone());
        }
    }

    /// Turn empty strings into `None`, as the form submits them.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.type_projet,
            &mut self.adresse,
            &mut self.date_debut,
            &mut self.date_fin_prevue,
            &mut self.date_fin_reelle,
            &mut self.notes,
        ] {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        if self.lead_id.as_ref().is_some_and(|id| id.as_str().is_empty()) {
            self.lead_id = None;
        }
        if self.devis_id.as_ref().is_some_and(|id| id.as_str().is_empty()) {
            self.devis_id = None;
        }
        self
    }
}

/// Company configuration (single row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: RowId,
    pub nom_entreprise: String,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub siret: Option<String>,
    #[serde(default)]
    pub tva_numero: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Partial update of the configuration row; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nom_entreprise: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adresse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub siret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tva_numero: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}
