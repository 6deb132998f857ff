//! Hierarchical objective codes: `subject.grade.unit.topic[.sub]`

use crate::errors::{AppError, Result};
use std::fmt;
use std::str::FromStr;

/// Parsed objective code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectiveCode {
    pub subject: String,
    pub grade: u8,
    pub unit: u32,
    pub topic: u32,
    pub sub: Option<String>,
}

impl ObjectiveCode {
    /// Parse a code, rejecting anything that is not `subject.grade.unit.topic[.sub]`
    pub fn parse(code: &str) -> Result<Self> {
        let invalid = || AppError::InvalidObjectiveCode {
            code: code.to_string(),
        };

        let parts: Vec<&str> = code.trim().split('.').collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(invalid());
        }

        let subject = parts[0];
        if subject.is_empty() || !subject.chars().all(char::is_alphabetic) {
            return Err(invalid());
        }

        let grade: u8 = parts[1].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&grade) {
            return Err(invalid());
        }

        let unit: u32 = parts[2].parse().map_err(|_| invalid())?;
        let topic: u32 = parts[3].parse().map_err(|_| invalid())?;
        if unit == 0 || topic == 0 {
            return Err(invalid());
        }

        let sub = match parts.get(4) {
            Some(s) if s.is_empty() || !s.chars().all(char::is_alphanumeric) => {
                return Err(invalid())
            }
            Some(s) => Some(s.to_string()),
            None => None,
        };

        Ok(Self {
            subject: subject.to_uppercase(),
            grade,
            unit,
            topic,
            sub,
        })
    }

    /// Code of the first topic in the same unit
    pub fn unit_opening(&self) -> ObjectiveCode {
        ObjectiveCode {
            subject: self.subject.clone(),
            grade: self.grade,
            unit: self.unit,
            topic: 1,
            sub: None,
        }
    }

    /// `subject.grade.unit` prefix
    pub fn unit_prefix(&self) -> String {
        format!("{}.{}.{}", self.subject, self.grade, self.unit)
    }
}

impl FromStr for ObjectiveCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectiveCode::parse(s)
    }
}

impl fmt::Display for ObjectiveCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.subject, self.grade, self.unit, self.topic)?;
        if let Some(sub) = &self.sub {
            write!(f, ".{}", sub)?;
        }
        Ok(())
    }
}
