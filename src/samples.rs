//! Small standalone samples shipped next to the runner demo
//!
//! None of these touch the runtime; the `samples` demo prints them.

use std::collections::HashMap;
use std::fmt;

/// Greeting used by the samples demo
pub fn greet(name: &str) -> String {
    format!("{}! Are you here?", name)
}

/// A field that differs between two rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDifference {
    pub index: usize,
    pub origin: String,
    pub result: String,
}

/// Result of comparing two delimited rows field by field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowComparison {
    /// The raw rows differ in length; fields were not compared
    LengthMismatch,
    /// The rows split into a different number of fields
    FieldCountMismatch,
    /// Every field was compared; empty when the rows are equal
    Compared(Vec<FieldDifference>),
}

impl RowComparison {
    pub fn is_identical(&self) -> bool {
        matches!(self, RowComparison::Compared(diffs) if diffs.is_empty())
    }
}

const SAME_LENGTH: &str = ">>> Length of two row is same! JOB CONTINUE!!!";
const SAME_FIELD_COUNT: &str =
    ">>> Length of two row (originItems and resultItems) is same! JOB CONTINUE!!!";

impl fmt::Display for RowComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowComparison::LengthMismatch => {
                write!(f, ">>> Length of two row is NOT same! JOB DONE!!!")
            }
            RowComparison::FieldCountMismatch => {
                writeln!(f, "{}", SAME_LENGTH)?;
                write!(
                    f,
                    ">>> Length of two row (originItems and resultItems) is NOT same! JOB DONE!!!"
                )
            }
            RowComparison::Compared(diffs) => {
                writeln!(f, "{}", SAME_LENGTH)?;
                write!(f, "{}", SAME_FIELD_COUNT)?;
                for diff in diffs {
                    write!(
                        f,
                        "\n>>> Difference of this two on index {}: origin = {}\t\tresult = {}",
                        diff.index, diff.origin, diff.result
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Compare two rows split on `separator`
///
/// Rows of different raw length are rejected before splitting.
pub fn compare_rows(origin: &str, result: &str, separator: &str) -> RowComparison {
    if origin.len() != result.len() {
        return RowComparison::LengthMismatch;
    }

    let origin_fields: Vec<&str> = origin.split(separator).collect();
    let result_fields: Vec<&str> = result.split(separator).collect();
    if origin_fields.len() != result_fields.len() {
        return RowComparison::FieldCountMismatch;
    }

    let diffs = origin_fields
        .iter()
        .zip(&result_fields)
        .enumerate()
        .filter(|(_, (o, r))| o != r)
        .map(|(index, (o, r))| FieldDifference {
            index,
            origin: o.to_string(),
            result: r.to_string(),
        })
        .collect();
    RowComparison::Compared(diffs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Man,
    Woman,
}

/// Value-compared record usable as a map key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Person {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
}

impl Person {
    pub fn new(name: impl Into<String>, age: u32, gender: Gender) -> Self {
        Self {
            name: name.into(),
            age,
            gender,
        }
    }
}

/// Insert every pair into a map keyed by person; equal records collapse
/// and the last value wins
pub fn dedup_people<I>(entries: I) -> HashMap<Person, String>
where
    I: IntoIterator<Item = (Person, String)>,
{
    entries.into_iter().collect()
}
