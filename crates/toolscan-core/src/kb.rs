//! Knowledge-base browsing: a filtered, selectable view over the entry list
//! plus a validated edit form.

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::api::ScanBackend;
use crate::classify::{classify, LicenseCategory};
use crate::error::{ScanError, ValidationError};
use crate::model::{KbData, KbDetail, KbOrder, KnowledgeBaseEntry};

/// Entries requested per listing.
pub const LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LicenseFilter {
    #[default]
    All,
    Open,
    Commercial,
    /// Licenses that are neither open nor commercial. Entries without a
    /// license only show up under `All`.
    Other,
}

impl LicenseFilter {
    pub fn admits(self, license: Option<&str>) -> bool {
        let category = classify(license);
        match self {
            Self::All => true,
            Self::Open => category == LicenseCategory::Open,
            Self::Commercial => category == LicenseCategory::Commercial,
            Self::Other => category == LicenseCategory::Other,
        }
    }
}

/// Client-side cache of the knowledge-base listing with search, license
/// filter and a single selection.
#[derive(Debug, Default)]
pub struct KbCatalog {
    entries: Vec<KnowledgeBaseEntry>,
    visible: Vec<usize>,
    query: String,
    filter: LicenseFilter,
    order: KbOrder,
    selected: Option<String>,
}

impl KbCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<KnowledgeBaseEntry>) -> Self {
        let mut catalog = Self {
            entries,
            ..Self::default()
        };
        catalog.refilter();
        catalog.selected = catalog.first_visible();
        catalog
    }

    /// Fetch the listing in `order`, clearing the search and selecting the
    /// first visible entry.
    #[instrument(level = "debug", skip(self, backend))]
    pub async fn load<B>(&mut self, backend: &B, order: KbOrder) -> Result<(), ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        let entries = backend.kb_list(LIST_LIMIT, order).await?;
        debug!(entries = entries.len(), "knowledge base listed");
        self.entries = entries;
        self.order = order;
        self.query.clear();
        self.refilter();
        self.selected = self.first_visible();
        Ok(())
    }

    /// Re-fetch with the current order.
    pub async fn reload<B>(&mut self, backend: &B) -> Result<(), ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        self.load(backend, self.order).await
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn license_filter(&self) -> LicenseFilter {
        self.filter
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.trim().to_lowercase();
        self.refilter();
        self.keep_selection_visible();
    }

    pub fn set_license_filter(&mut self, filter: LicenseFilter) {
        self.filter = filter;
        self.refilter();
        self.keep_selection_visible();
    }

    /// Select a visible entry by name. Returns `false` if it is not visible.
    pub fn select(&mut self, tool_name: &str) -> bool {
        let visible = self.visible().any(|entry| entry.tool_name == tool_name);
        if visible {
            self.selected = Some(tool_name.to_string());
        }
        visible
    }

    pub fn visible(&self) -> impl Iterator<Item = &KnowledgeBaseEntry> + '_ {
        self.visible.iter().map(|&index| &self.entries[index])
    }

    pub fn selected(&self) -> Option<&KnowledgeBaseEntry> {
        let name = self.selected.as_deref()?;
        self.entries.iter().find(|entry| entry.tool_name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn detail<B>(&self, backend: &B, tool_name: &str) -> Result<KbDetail, ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        backend.kb_detail(tool_name).await
    }

    /// Delete an entry, moving the selection to the first visible entry if
    /// the deleted one was selected.
    #[instrument(level = "debug", skip(self, backend))]
    pub async fn delete<B>(&mut self, backend: &B, tool_name: &str) -> Result<(), ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        backend.kb_delete(tool_name).await?;
        self.entries.retain(|entry| entry.tool_name != tool_name);
        self.refilter();
        if self.selected.as_deref() == Some(tool_name) {
            self.selected = self.first_visible();
        }
        info!(tool = tool_name, "knowledge-base entry deleted");
        Ok(())
    }

    /// Load the full stored data of `tool_name` into an edit form.
    pub async fn begin_edit<B>(&self, backend: &B, tool_name: &str) -> Result<KbEditForm, ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        let entry = backend.kb_entry(tool_name).await?;
        Ok(KbEditForm::from_data(&entry.data))
    }

    /// Validate `form`, merge it over the entry's stored data and save.
    ///
    /// Validation happens before any network call. Fields the form does not
    /// cover are carried over from the stored entry unchanged.
    #[instrument(level = "debug", skip(self, backend, form))]
    pub async fn save_edit<B>(
        &mut self,
        backend: &B,
        tool_name: &str,
        form: &KbEditForm,
    ) -> Result<KnowledgeBaseEntry, ScanError>
    where
        B: ScanBackend + ?Sized,
    {
        let patch = form.validate()?;
        let base = backend.kb_entry(tool_name).await?.data;
        let data = patch.apply(&base);
        let stored = backend.kb_replace(tool_name, &data).await?;

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.tool_name == tool_name)
        {
            entry.data = data;
        }
        self.refilter();
        self.keep_selection_visible();
        info!(tool = tool_name, "knowledge-base entry saved");
        Ok(stored)
    }

    fn refilter(&mut self) {
        let query = self.query.as_str();
        let filter = self.filter;
        self.visible = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| query.is_empty() || entry.tool_name.to_lowercase().contains(query))
            .filter(|(_, entry)| filter.admits(entry.data.license_type.as_deref()))
            .map(|(index, _)| index)
            .collect();
    }

    fn first_visible(&self) -> Option<String> {
        self.visible().next().map(|entry| entry.tool_name.clone())
    }

    fn keep_selection_visible(&mut self) {
        let still_visible = self
            .selected
            .as_deref()
            .is_some_and(|name| self.visible().any(|entry| entry.tool_name == name));
        if !still_visible {
            self.selected = self.first_visible();
        }
    }
}

/// Editable text rendition of a knowledge-base entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KbEditForm {
    pub license_type: String,
    pub license_version: String,
    pub license_mode: String,
    pub company_name: String,
    pub company_country: String,
    pub company_headquarters: String,
    pub china_office: bool,
    pub commercial_license_required: bool,
    pub free_for_commercial: bool,
    pub commercial_restrictions: String,
    pub user_limit: String,
    pub feature_restrictions: String,
    /// JSON array text.
    pub alternative_tools: String,
}

impl KbEditForm {
    pub const FIELDS: &'static [&'static str] = &[
        "license_type",
        "license_version",
        "license_mode",
        "company_name",
        "company_country",
        "company_headquarters",
        "china_office",
        "commercial_license_required",
        "free_for_commercial",
        "commercial_restrictions",
        "user_limit",
        "feature_restrictions",
        "alternative_tools",
    ];

    pub fn from_data(data: &KbData) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        Self {
            license_type: text(&data.license_type),
            license_version: text(&data.license_version),
            license_mode: text(&data.license_mode),
            company_name: text(&data.company_name),
            company_country: text(&data.company_country),
            company_headquarters: text(&data.company_headquarters),
            china_office: data.china_office.unwrap_or(false),
            commercial_license_required: data.commercial_license_required.unwrap_or(false),
            free_for_commercial: data.free_for_commercial.unwrap_or(false),
            commercial_restrictions: text(&data.commercial_restrictions),
            user_limit: text(&data.user_limit),
            feature_restrictions: text(&data.feature_restrictions),
            alternative_tools: serde_json::to_string_pretty(&data.alternative_tools)
                .unwrap_or_else(|_| "[]".to_string()),
        }
    }

    /// Set one field by name from text input.
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), ValidationError> {
        let slot = match field {
            "license_type" => &mut self.license_type,
            "license_version" => &mut self.license_version,
            "license_mode" => &mut self.license_mode,
            "company_name" => &mut self.company_name,
            "company_country" => &mut self.company_country,
            "company_headquarters" => &mut self.company_headquarters,
            "commercial_restrictions" => &mut self.commercial_restrictions,
            "user_limit" => &mut self.user_limit,
            "feature_restrictions" => &mut self.feature_restrictions,
            "alternative_tools" => &mut self.alternative_tools,
            "china_office" | "commercial_license_required" | "free_for_commercial" => {
                let flag = parse_flag(field, value)?;
                match field {
                    "china_office" => self.china_office = flag,
                    "commercial_license_required" => self.commercial_license_required = flag,
                    _ => self.free_for_commercial = flag,
                }
                return Ok(());
            }
            other => {
                return Err(ValidationError::UnknownField {
                    field: other.to_string(),
                })
            }
        };
        *slot = value.to_string();
        Ok(())
    }

    /// Check the form and turn it into a patch.
    pub fn validate(&self) -> Result<KbPatch, ValidationError> {
        let alternatives = self.alternative_tools.trim();
        let alternative_tools = if alternatives.is_empty() {
            Vec::new()
        } else {
            match serde_json::from_str::<Value>(alternatives) {
                Ok(Value::Array(items)) => items,
                Ok(other) => {
                    return Err(ValidationError::AlternativeTools {
                        reason: format!("expected an array, got {}", json_kind(&other)),
                    })
                }
                Err(err) => {
                    return Err(ValidationError::AlternativeTools {
                        reason: err.to_string(),
                    })
                }
            }
        };
        Ok(KbPatch {
            license_type: trimmed(&self.license_type),
            license_version: trimmed(&self.license_version),
            license_mode: trimmed(&self.license_mode),
            company_name: trimmed(&self.company_name),
            company_country: trimmed(&self.company_country),
            company_headquarters: trimmed(&self.company_headquarters),
            china_office: self.china_office,
            commercial_license_required: self.commercial_license_required,
            free_for_commercial: self.free_for_commercial,
            commercial_restrictions: trimmed(&self.commercial_restrictions),
            user_limit: trimmed(&self.user_limit),
            feature_restrictions: trimmed(&self.feature_restrictions),
            alternative_tools,
        })
    }
}

/// Validated form contents, ready to be merged over stored data.
#[derive(Debug, Clone, PartialEq)]
pub struct KbPatch {
    pub license_type: Option<String>,
    pub license_version: Option<String>,
    pub license_mode: Option<String>,
    pub company_name: Option<String>,
    pub company_country: Option<String>,
    pub company_headquarters: Option<String>,
    pub china_office: bool,
    pub commercial_license_required: bool,
    pub free_for_commercial: bool,
    pub commercial_restrictions: Option<String>,
    pub user_limit: Option<String>,
    pub feature_restrictions: Option<String>,
    pub alternative_tools: Vec<Value>,
}

impl KbPatch {
    /// Overlay the form fields on `base`; every other field of `base` is kept.
    pub fn apply(self, base: &KbData) -> KbData {
        KbData {
            license_type: self.license_type,
            license_version: self.license_version,
            license_mode: self.license_mode,
            company_name: self.company_name,
            company_country: self.company_country,
            company_headquarters: self.company_headquarters,
            china_office: Some(self.china_office),
            commercial_license_required: Some(self.commercial_license_required),
            free_for_commercial: Some(self.free_for_commercial),
            commercial_restrictions: self.commercial_restrictions,
            user_limit: self.user_limit,
            feature_restrictions: self.feature_restrictions,
            alternative_tools: self.alternative_tools,
            ..base.clone()
        }
    }
}

fn trimmed(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ValidationError::InvalidFlag {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
