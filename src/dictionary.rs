//! Field and enumerated-type dictionaries.
//!
//! A [`DataDictionary`] has two parts, loaded independently: the field
//! dictionary (`RDMFieldDictionary` format) and the enum-type tables
//! (`enumtype.def` format). It is ready once both are present, whether they
//! came from local files or were downloaded from a peer.
//!
//! Both file formats are line based, with `!` starting a comment line.
//!
//! ```text
//! ! ACRONYM  DDE ACRONYM   FID  RIPPLES TO  FIELD TYPE  LENGTH  RWF TYPE  RWF LEN
//! TRDPRC_1   "LAST"          6  TRDPRC_2    PRICE           17  REAL64          7
//! RDN_EXCHID "IDN EXCHANGE ID" 4 NULL      ENUMERATED    3 ( 3 )  ENUM            1
//! ```
//!
//! ```text
//! RDN_EXCHID     4
//!      0         "   "   undefined
//!      1         "ASE"   NYSE AMEX
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::errors::DictionaryError;

/// One entry of the field dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, e.g. `TRDPRC_1`.
    pub acronym: String,
    /// Display name, quoted in the file.
    pub dde_acronym: String,
    /// Field id.
    pub fid: i16,
    /// Acronym of the field this one ripples into, if any.
    pub ripples_to: Option<String>,
    /// Marketfeed type such as `PRICE` or `ENUMERATED`.
    pub field_type: String,
    /// Marketfeed length.
    pub length: u16,
    /// Enumerated display length, the parenthesised part of the length column.
    pub enum_length: Option<u16>,
    /// Wire type such as `REAL64`.
    pub rwf_type: String,
    /// Wire length in bytes.
    pub rwf_length: u16,
}

/// A value of an enumerated type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    /// Encoded value.
    pub value: u16,
    /// Display text, quotes kept.
    pub display: String,
    /// Free-text description.
    pub meaning: String,
}

/// An enumerated type shared by one or more fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumTable {
    /// `(acronym, fid)` of every field using this table.
    pub fields: Vec<(String, i16)>,
    /// Values in file order.
    pub values: Vec<EnumValue>,
}

/// Field and enum-type dictionary of the provider.
///
/// Each part is either fully loaded or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDictionary {
    fields: Option<BTreeMap<i16, FieldDef>>,
    enums: Option<Vec<EnumTable>>,
}

impl DataDictionary {
    /// Empty dictionary with neither part loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads both parts from files. Either part may fail independently.
    pub fn load(field_path: &Path, enum_path: &Path) -> (Self, Vec<DictionaryError>) {
        let mut dictionary = Self::new();
        let mut errors = Vec::new();
        if let Err(e) = dictionary.load_field_file(field_path) {
            errors.push(e);
        }
        if let Err(e) = dictionary.load_enum_file(enum_path) {
            errors.push(e);
        }
        (dictionary, errors)
    }

    /// Both parts are loaded.
    pub fn is_ready(&self) -> bool {
        self.fields.is_some() && self.enums.is_some()
    }

    /// The field dictionary is loaded.
    pub fn has_fields(&self) -> bool {
        self.fields.is_some()
    }

    /// The enum-type tables are loaded.
    pub fn has_enums(&self) -> bool {
        self.enums.is_some()
    }

    /// Field definition by id.
    pub fn field(&self, fid: i16) -> Option<&FieldDef> {
        self.fields.as_ref()?.get(&fid)
    }

    /// Field definition by acronym.
    pub fn field_by_acronym(&self, acronym: &str) -> Option<&FieldDef> {
        self.fields
            .as_ref()?
            .values()
            .find(|f| f.acronym == acronym)
    }

    /// Number of loaded field definitions.
    pub fn field_count(&self) -> usize {
        self.fields.as_ref().map_or(0, BTreeMap::len)
    }

    /// Loaded enum-type tables; empty when the part is missing.
    pub fn enum_tables(&self) -> &[EnumTable] {
        self.enums.as_deref().unwrap_or(&[])
    }

    /// Enumerated table used by `fid`.
    pub fn enum_table_for(&self, fid: i16) -> Option<&EnumTable> {
        self.enum_tables()
            .iter()
            .find(|t| t.fields.iter().any(|(_, f)| *f == fid))
    }

    /// Replaces the field part with the contents of `path`.
    ///
    /// # Errors
    /// [`DictionaryError::Io`] or [`DictionaryError::Parse`]; the part is left untouched.
    pub fn load_field_file(&mut self, path: &Path) -> Result<(), DictionaryError> {
        let text = read_file(path)?;
        self.fields = Some(parse_fields(&text)?);
        log::info!(
            "Loaded {} field definitions from {}",
            self.field_count(),
            path.display()
        );
        Ok(())
    }

    /// Replaces the enum-type part with the contents of `path`.
    ///
    /// # Errors
    /// [`DictionaryError::Io`] or [`DictionaryError::Parse`]; the part is left untouched.
    pub fn load_enum_file(&mut self, path: &Path) -> Result<(), DictionaryError> {
        let text = read_file(path)?;
        let tables = parse_enums(&text)?;
        log::info!(
            "Loaded {} enumerated types from {}",
            tables.len(),
            path.display()
        );
        self.enums = Some(tables);
        Ok(())
    }

    /// Field dictionary as carried in a dictionary refresh.
    pub fn field_payload(&self) -> Value {
        let fields: Vec<&FieldDef> = self
            .fields
            .as_ref()
            .map(|f| f.values().collect())
            .unwrap_or_default();
        serde_json::json!({ "fields": fields })
    }

    /// Enum-type tables as carried in a dictionary refresh.
    pub fn enum_payload(&self) -> Value {
        serde_json::json!({ "enums": self.enum_tables() })
    }

    /// Installs a field dictionary received from a peer.
    pub fn apply_field_payload(&mut self, payload: &Value) -> Result<(), DictionaryError> {
        let fields: Vec<FieldDef> = payload
            .get("fields")
            .cloned()
            .ok_or_else(|| DictionaryError::Payload("missing fields".into()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| DictionaryError::Payload(e.to_string()))
            })?;
        self.fields = Some(fields.into_iter().map(|f| (f.fid, f)).collect());
        Ok(())
    }

    /// Installs enum-type tables received from a peer.
    pub fn apply_enum_payload(&mut self, payload: &Value) -> Result<(), DictionaryError> {
        let tables: Vec<EnumTable> = payload
            .get("enums")
            .cloned()
            .ok_or_else(|| DictionaryError::Payload("missing enums".into()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| DictionaryError::Payload(e.to_string()))
            })?;
        self.enums = Some(tables);
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, DictionaryError> {
    fs::read_to_string(path).map_err(|e| DictionaryError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Splits a line into whitespace-separated tokens; a double-quoted run is one token.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let quoted: String = chars.by_ref().take_while(|&c| c != '"').collect();
            tokens.push(quoted);
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(word);
        }
    }
    tokens
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('!')
}

fn parse_num<T: std::str::FromStr>(token: &str, line: usize, what: &str) -> Result<T, DictionaryError> {
    token.parse().map_err(|_| DictionaryError::Parse {
        line,
        reason: format!("invalid {} '{}'", what, token),
    })
}

/// Parses the `RDMFieldDictionary` format.
pub fn parse_fields(text: &str) -> Result<BTreeMap<i16, FieldDef>, DictionaryError> {
    let mut fields = BTreeMap::new();
    for (index, line) in text.lines().enumerate() {
        if is_comment(line) {
            continue;
        }
        let line_no = index + 1;
        let tokens = tokenize(line);
        if tokens.len() < 8 {
            return Err(DictionaryError::Parse {
                line: line_no,
                reason: format!("expected 8 columns, found {}", tokens.len()),
            });
        }

        // Optional "( n )" after the length column, possibly split over tokens.
        let mut rest = tokens[6..].iter();
        let mut enum_length = None;
        let mut rwf_type = None;
        let mut group = String::new();
        for token in rest.by_ref() {
            if !group.is_empty() || token.starts_with('(') {
                group.push_str(token);
                if token.ends_with(')') {
                    let inner = group.trim_start_matches('(').trim_end_matches(')').trim();
                    enum_length = Some(parse_num(inner, line_no, "enum length")?);
                    group.clear();
                }
                continue;
            }
            rwf_type = Some(token.clone());
            break;
        }
        let rwf_type = rwf_type.ok_or(DictionaryError::Parse {
            line: line_no,
            reason: "missing RWF type".into(),
        })?;
        let rwf_length = match rest.next() {
            Some(token) => parse_num(token, line_no, "RWF length")?,
            None => {
                return Err(DictionaryError::Parse {
                    line: line_no,
                    reason: "missing RWF length".into(),
                })
            }
        };

        let def = FieldDef {
            acronym: tokens[0].clone(),
            dde_acronym: tokens[1].clone(),
            fid: parse_num(&tokens[2], line_no, "fid")?,
            ripples_to: match tokens[3].as_str() {
                "NULL" => None,
                other => Some(other.to_string()),
            },
            field_type: tokens[4].clone(),
            length: parse_num(&tokens[5], line_no, "length")?,
            enum_length,
            rwf_type,
            rwf_length,
        };
        fields.insert(def.fid, def);
    }
    Ok(fields)
}

/// Parses the `enumtype.def` format.
///
/// A run of `ACRONYM FID` lines opens a table; the value lines that follow
/// belong to it until the next run of references.
pub fn parse_enums(text: &str) -> Result<Vec<EnumTable>, DictionaryError> {
    let mut tables: Vec<EnumTable> = Vec::new();
    let mut current = EnumTable::default();
    for (index, line) in text.lines().enumerate() {
        if is_comment(line) {
            continue;
        }
        let line_no = index + 1;
        let tokens = tokenize(line);
        let first = &tokens[0];

        if first.chars().all(|c| c.is_ascii_digit()) {
            if current.fields.is_empty() {
                return Err(DictionaryError::Parse {
                    line: line_no,
                    reason: "enum value before any field reference".into(),
                });
            }
            if tokens.len() < 2 {
                return Err(DictionaryError::Parse {
                    line: line_no,
                    reason: "missing display value".into(),
                });
            }
            current.values.push(EnumValue {
                value: parse_num(first, line_no, "enum value")?,
                display: tokens[1].clone(),
                meaning: tokens[2..].join(" "),
            });
        } else {
            if !current.values.is_empty() {
                tables.push(std::mem::take(&mut current));
            }
            let fid = match tokens.get(1) {
                Some(token) => parse_num(token, line_no, "fid")?,
                None => {
                    return Err(DictionaryError::Parse {
                        line: line_no,
                        reason: "missing fid".into(),
                    })
                }
            };
            current.fields.push((first.clone(), fid));
        }
    }
    if !current.fields.is_empty() {
        tables.push(current);
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FIELDS: &str = r#"
! ACRONYM    DDE ACRONYM          FID  RIPPLES TO  FIELD TYPE     LENGTH  RWF TYPE   RWF LEN
!
PROD_PERM  "PERMISSION"             1  NULL        INTEGER             5  UINT64           2
RDN_EXCHID "IDN EXCHANGE ID"        4  NULL        ENUMERATED    3 ( 3 )  ENUM             1
TRDPRC_1   "LAST"                   6  TRDPRC_2    PRICE              17  REAL64           7
"#;

    const ENUMS: &str = r#"
! ACRONYM    FID
! -------    ---
RDN_EXCHID     4
DIVID_EXCH   345
!
! VALUE      DISPLAY   MEANING
     0         "   "   undefined
     1         "ASE"   NYSE AMEX
!
PRCTCK_1      14
     0         " "     unspecified
     1         #DE#    up tick
"#;

    fn temp_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields(FIELDS).unwrap();

        assert_eq!(fields.len(), 3);
        let exch = &fields[&4];
        assert_eq!(exch.dde_acronym, "IDN EXCHANGE ID");
        assert_eq!(exch.enum_length, Some(3));
        assert_eq!(exch.rwf_type, "ENUM");
        assert_eq!(exch.rwf_length, 1);
        assert_eq!(fields[&6].ripples_to.as_deref(), Some("TRDPRC_2"));
        assert_eq!(fields[&1].ripples_to, None);
    }

    #[test]
    fn test_parse_fields_rejects_short_line() {
        let err = parse_fields("BAD \"X\" 1 NULL\n").unwrap_err();
        assert!(matches!(err, DictionaryError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_parse_enums() {
        let tables = parse_enums(ENUMS).unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(
            tables[0].fields,
            vec![("RDN_EXCHID".to_string(), 4), ("DIVID_EXCH".to_string(), 345)]
        );
        assert_eq!(tables[0].values[1].display, "ASE");
        assert_eq!(tables[0].values[1].meaning, "NYSE AMEX");
        assert_eq!(tables[1].values[1].display, "#DE#");
    }

    #[test]
    fn test_enum_value_without_reference_fails() {
        assert!(parse_enums("   0  \"x\"  none\n").is_err());
    }

    #[test]
    fn test_load_from_files() {
        let fields = temp_file(FIELDS);
        let enums = temp_file(ENUMS);

        let (dictionary, errors) = DataDictionary::load(fields.path(), enums.path());

        assert!(errors.is_empty());
        assert!(dictionary.is_ready());
        assert_eq!(dictionary.field_by_acronym("TRDPRC_1").unwrap().fid, 6);
        assert_eq!(dictionary.enum_table_for(345).unwrap().values.len(), 2);
    }

    #[test]
    fn test_missing_file_leaves_part_unloaded() {
        let fields = temp_file(FIELDS);

        let (dictionary, errors) =
            DataDictionary::load(fields.path(), Path::new("/nonexistent/enumtype.def"));

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], DictionaryError::Io { .. }));
        assert!(dictionary.has_fields());
        assert!(!dictionary.is_ready());
    }

    #[test]
    fn test_payload_transfer() {
        let mut source = DataDictionary::new();
        source.fields = Some(parse_fields(FIELDS).unwrap());
        source.enums = Some(parse_enums(ENUMS).unwrap());

        let mut copy = DataDictionary::new();
        copy.apply_field_payload(&source.field_payload()).unwrap();
        assert!(!copy.is_ready());
        copy.apply_enum_payload(&source.enum_payload()).unwrap();

        assert!(copy.is_ready());
        assert_eq!(copy, source);
    }

    #[test]
    fn test_bad_payload() {
        let mut dictionary = DataDictionary::new();
        let err = dictionary
            .apply_field_payload(&serde_json::json!({"fields": 3}))
            .unwrap_err();
        assert!(matches!(err, DictionaryError::Payload(_)));
        assert!(!dictionary.has_fields());
    }
}
