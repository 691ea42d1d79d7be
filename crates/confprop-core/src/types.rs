use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Partition of the configuration store an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Schedule,
    Period,
    Account,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Schedule => "schedule",
            EntityType::Period => "period",
            EntityType::Account => "account",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "schedule" => Ok(EntityType::Schedule),
            "period" => Ok(EntityType::Period),
            "account" => Ok(EntityType::Account),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Modify,
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Modify => "MODIFY",
            ChangeOperation::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl FromStr for ChangeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INSERT" => Ok(ChangeOperation::Insert),
            "MODIFY" => Ok(ChangeOperation::Modify),
            "DELETE" => Ok(ChangeOperation::Delete),
            other => Err(format!("unknown change operation: {}", other)),
        }
    }
}

/// Monotonic change-log position, carried as a decimal digit string.
///
/// Ordering is numeric: leading zeros are ignored, a shorter significant
/// part sorts first, equal lengths compare lexically. Every digit string
/// sorts before every non-digit string; those compare lexically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fixed-width rendering of a store-local counter.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("{:021}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn significant(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() && !self.0.is_empty() {
            "0"
        } else {
            trimmed
        }
    }

    fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl PartialEq for SequenceNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceNumber {}

impl std::hash::Hash for SequenceNumber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.is_numeric() {
            self.significant().hash(state)
        } else {
            self.0.hash(state)
        }
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_numeric(), other.is_numeric()) {
            (true, true) => {
                let (a, b) = (self.significant(), other.significant());
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a configuration item, also the partition key of its changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
}

impl ConfigKey {
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            name: name.into(),
        }
    }

    pub fn schedule(name: impl Into<String>) -> Self {
        Self::new(EntityType::Schedule, name)
    }

    pub fn period(name: impl Into<String>) -> Self {
        Self::new(EntityType::Period, name)
    }

    pub fn account(name: impl Into<String>) -> Self {
        Self::new(EntityType::Account, name)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.name)
    }
}

/// One mutation of the configuration store as delivered by its change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub operation: ChangeOperation,
    #[serde(rename = "sequenceNumber", alias = "sequence_number")]
    pub sequence_number: SequenceNumber,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl ChangeRecord {
    pub fn new(
        key: impl Into<String>,
        entity_type: EntityType,
        operation: ChangeOperation,
        sequence_number: SequenceNumber,
    ) -> Self {
        Self {
            key: key.into(),
            entity_type,
            operation,
            sequence_number,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn partition_key(&self) -> ConfigKey {
        ConfigKey::new(self.entity_type, self.key.clone())
    }
}

/// Records closed together inside one window, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub batch_id: Uuid,
    pub records: Vec<ChangeRecord>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl ChangeBatch {
    /// Returns `None` for an empty record set; an empty batch is never dispatched.
    pub fn new(
        records: Vec<ChangeRecord>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        Some(Self {
            batch_id: Uuid::new_v4(),
            records,
            window_start,
            window_end,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct keys touched by the batch, in first-seen order.
    pub fn keys(&self) -> Vec<ConfigKey> {
        let mut seen = HashSet::with_capacity(self.records.len());
        self.records
            .iter()
            .map(ChangeRecord::partition_key)
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }
}

/// Decoded payload of a `schedule` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub name: String,
    #[serde(default)]
    pub periods: Vec<String>,
}

impl ScheduleDefinition {
    pub fn new<S: Into<String>>(name: impl Into<String>, periods: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            periods: periods.into_iter().map(Into::into).collect(),
        }
    }

    pub fn references_period(&self, period: &str) -> bool {
        self.periods.iter().any(|p| p == period)
    }
}

/// The one organization whose member accounts may register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedOrganization {
    organization_id: String,
}

impl TrustedOrganization {
    pub fn new(organization_id: impl Into<String>) -> Option<Self> {
        let organization_id = organization_id.into().trim().to_string();
        if organization_id.is_empty() {
            None
        } else {
            Some(Self { organization_id })
        }
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn admits(&self, organization_id: &str) -> bool {
        self.organization_id == organization_id
    }
}

/// Lifecycle action a spoke account's agent reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationAction {
    Create,
    Delete,
}

impl fmt::Display for RegistrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationAction::Create => f.write_str("Create"),
            RegistrationAction::Delete => f.write_str("Delete"),
        }
    }
}

impl FromStr for RegistrationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(RegistrationAction::Create),
            "Delete" => Ok(RegistrationAction::Delete),
            other => Err(format!("unsupported registration action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub source_account_id: String,
    pub organization_id: String,
    pub action: RegistrationAction,
    pub parameter_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, seq: u64) -> ChangeRecord {
        ChangeRecord::new(
            key,
            EntityType::Schedule,
            ChangeOperation::Modify,
            SequenceNumber::from_counter(seq),
        )
    }

    #[test]
    fn sequence_numbers_order_numerically() {
        let a = SequenceNumber::new("9");
        let b = SequenceNumber::new("10");
        let c = SequenceNumber::new("000000010");
        assert!(a < b);
        assert_eq!(b, c);
        assert!(SequenceNumber::new("155230700000000069047952291") > SequenceNumber::new("99"));
    }

    #[test]
    fn mixed_sequence_numbers_have_a_total_order() {
        let two = SequenceNumber::new("2");
        let ten = SequenceNumber::new("10");
        let odd = SequenceNumber::new("1x");
        assert!(two < ten);
        assert!(ten < odd);
        assert!(two < odd);

        let mut values: Vec<SequenceNumber> = ["b", "10", "1x", "002", "", "9", "a"]
            .into_iter()
            .map(SequenceNumber::new)
            .collect();
        values.sort();
        let sorted: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
        assert_eq!(sorted, vec!["002", "9", "10", "", "1x", "a", "b"]);

        for a in &values {
            for b in &values {
                for c in &values {
                    if a <= b && b <= c {
                        assert!(a <= c, "{} <= {} <= {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn equal_sequence_numbers_hash_alike() {
        let set: HashSet<SequenceNumber> = ["7", "0007", "x7"].into_iter().map(SequenceNumber::new).collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&SequenceNumber::new("07")));
    }

    #[test]
    fn change_record_uses_sequence_number_wire_name() {
        let raw = r#"{"key":"sched-1","type":"schedule","operation":"MODIFY","sequenceNumber":"155230700000000069047952291"}"#;
        let record: ChangeRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.sequence_number.as_str(), "155230700000000069047952291");
        assert_eq!(record.entity_type, EntityType::Schedule);
        assert_eq!(record.operation, ChangeOperation::Modify);
        assert!(record.payload.is_empty());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sequenceNumber"], "155230700000000069047952291");
        assert!(json.get("sequence_number").is_none());

        let legacy = r#"{"key":"p","type":"period","operation":"INSERT","sequence_number":"3"}"#;
        let record: ChangeRecord = serde_json::from_str(legacy).unwrap();
        assert_eq!(record.sequence_number, SequenceNumber::new("3"));
    }

    #[test]
    fn counter_sequence_numbers_are_fixed_width() {
        let s = SequenceNumber::from_counter(42);
        assert_eq!(s.as_str().len(), 21);
        assert!(SequenceNumber::from_counter(41) < s);
    }

    #[test]
    fn batch_keys_are_deduplicated_in_first_seen_order() {
        let batch = ChangeBatch::new(
            vec![record("b", 1), record("a", 2), record("b", 3)],
            Utc::now(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(batch.keys(), vec![ConfigKey::schedule("b"), ConfigKey::schedule("a")]);
    }

    #[test]
    fn empty_batch_is_never_built() {
        assert!(ChangeBatch::new(Vec::new(), Utc::now(), Utc::now()).is_none());
    }

    #[test]
    fn schedule_and_period_with_same_name_are_distinct_keys() {
        assert_ne!(ConfigKey::schedule("x"), ConfigKey::period("x"));
        assert_eq!(ConfigKey::period("x").to_string(), "period:x");
    }

    #[test]
    fn trusted_organization_rejects_blank_ids() {
        assert!(TrustedOrganization::new("  ").is_none());
        let org = TrustedOrganization::new("o-abc123").unwrap();
        assert!(org.admits("o-abc123"));
        assert!(!org.admits("o-other"));
    }
}
