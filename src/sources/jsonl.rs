//! Newline-delimited JSON record source.

use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::SourceError;
use crate::models::{IngestionConfig, Record};

/// Which JSON fields map onto record parts.
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub text: String,
    pub id: Option<String>,
    /// Precomputed dense embedding; removed from the payload when present.
    pub dense: Option<String>,
}

impl Default for RecordFields {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for RecordFields {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            text: config.text_field.clone(),
            id: config.id_field.clone(),
            dense: config.dense_field.clone(),
        }
    }
}

/// Reads one JSON object per line, lazily.
pub struct JsonlSource<R> {
    reader: R,
    fields: RecordFields,
    line: usize,
    remaining: Option<usize>,
    buf: String,
}

impl JsonlSource<BufReader<File>> {
    pub fn open(path: &Path, fields: RecordFields) -> Result<Self, SourceError> {
        Ok(Self::new(BufReader::new(File::open(path)?), fields))
    }
}

impl JsonlSource<BufReader<io::Stdin>> {
    pub fn stdin(fields: RecordFields) -> Self {
        Self::new(BufReader::new(io::stdin()), fields)
    }
}

impl<R: BufRead> JsonlSource<R> {
    pub fn new(reader: R, fields: RecordFields) -> Self {
        Self {
            reader,
            fields,
            line: 0,
            remaining: None,
            buf: String::new(),
        }
    }

    /// Stop after `limit` records.
    pub fn take_records(mut self, limit: usize) -> Self {
        self.remaining = Some(limit);
        self
    }

    fn parse_line(&self, line: &str) -> Result<Record, SourceError> {
        let value: Value = serde_json::from_str(line).map_err(|e| SourceError::Parse {
            line: self.line,
            message: e.to_string(),
        })?;
        let Value::Object(mut payload) = value else {
            return Err(SourceError::Parse {
                line: self.line,
                message: "expected a JSON object".to_string(),
            });
        };

        let text = payload
            .get(&self.fields.text)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::MissingField {
                line: self.line,
                field: self.fields.text.clone(),
            })?;

        let id = self
            .fields
            .id
            .as_ref()
            .and_then(|field| payload.get(field))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        let dense = match self.fields.dense.as_ref() {
            Some(field) => Some(self.take_dense(&mut payload, field)?),
            None => None,
        };

        Ok(Record {
            id,
            text,
            payload,
            dense,
        })
    }

    fn take_dense(
        &self,
        payload: &mut Map<String, Value>,
        field: &str,
    ) -> Result<Vec<f32>, SourceError> {
        let value = payload
            .remove(field)
            .ok_or_else(|| SourceError::MissingField {
                line: self.line,
                field: field.to_string(),
            })?;
        serde_json::from_value(value).map_err(|e| SourceError::Parse {
            line: self.line,
            message: format!("{}: {}", field, e),
        })
    }
}

impl<R: BufRead> Iterator for JsonlSource<R> {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }

        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    let line = self.buf.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let record = self.parse_line(line);
                    if let Some(ref mut n) = self.remaining {
                        *n -= 1;
                    }
                    return Some(record);
                }
                Err(e) => return Some(Err(SourceError::IoError(e))),
            }
        }
    }
}
