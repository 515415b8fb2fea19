#![forbid(unsafe_code)]

use std::fmt;

use smallvec::SmallVec;

use crate::types::{Result, TdbError};

/// Permutation between a table's natural column order and one index's order.
///
/// Built from two labels such as `"SPO"` and `"POS"`: native slot `i` of the
/// index holds the natural column whose letter is at position `i` of the
/// index label.
#[derive(Clone, PartialEq, Eq)]
pub struct ColumnMap {
    label: String,
    /// `to_native[i]` = natural column stored in native slot `i`.
    to_native: SmallVec<[usize; 4]>,
    /// `to_natural[j]` = native slot holding natural column `j`.
    to_natural: SmallVec<[usize; 4]>,
}

impl ColumnMap {
    /// Builds the map from the primary label and an index label.
    pub fn from_labels(primary: &str, index: &str) -> Result<Self> {
        let primary: Vec<char> = primary.chars().collect();
        let index_chars: Vec<char> = index.chars().collect();
        if primary.len() != index_chars.len() {
            return Err(TdbError::InvalidColumnMap(format!(
                "{index} has {} columns, primary has {}",
                index_chars.len(),
                primary.len()
            )));
        }
        let mut order = Vec::with_capacity(primary.len());
        for c in &index_chars {
            let pos = primary.iter().position(|p| p == c).ok_or_else(|| {
                TdbError::InvalidColumnMap(format!("column {c} of {index} is not in the primary"))
            })?;
            order.push(pos);
        }
        Self::from_order(index, &order)
    }

    /// Builds the map from an explicit order: native slot `i` holds natural column `order[i]`.
    pub fn from_order(label: &str, order: &[usize]) -> Result<Self> {
        let mut to_natural: SmallVec<[usize; 4]> = SmallVec::from_elem(usize::MAX, order.len());
        for (native, &natural) in order.iter().enumerate() {
            let slot = to_natural.get_mut(natural).ok_or_else(|| {
                TdbError::InvalidColumnMap(format!("{label}: column {natural} out of range"))
            })?;
            if *slot != usize::MAX {
                return Err(TdbError::InvalidColumnMap(format!(
                    "{label}: column {natural} used twice"
                )));
            }
            *slot = native;
        }
        Ok(Self {
            label: label.to_owned(),
            to_native: SmallVec::from_slice(order),
            to_natural,
        })
    }

    /// Index label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.to_native.len()
    }

    /// Returns true for a zero-column map.
    pub fn is_empty(&self) -> bool {
        self.to_native.is_empty()
    }

    /// Reorders a natural-order tuple into native order.
    pub fn map<T: Copy>(&self, natural: &[T]) -> Result<SmallVec<[T; 4]>> {
        self.check_arity(natural.len())?;
        Ok(self.to_native.iter().map(|&col| natural[col]).collect())
    }

    /// Reorders a native-order tuple back into natural order.
    pub fn unmap<T: Copy>(&self, native: &[T]) -> Result<SmallVec<[T; 4]>> {
        self.check_arity(native.len())?;
        Ok(self.to_natural.iter().map(|&slot| native[slot]).collect())
    }

    /// Native slot of natural column `col`.
    pub fn map_slot(&self, col: usize) -> usize {
        self.to_natural[col]
    }

    /// Natural column stored in native slot `slot`.
    pub fn unmap_slot(&self, slot: usize) -> usize {
        self.to_native[slot]
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        if actual != self.len() {
            return Err(TdbError::Arity {
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ColumnMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnMap({} {:?})", self.label, self.to_native.as_slice())
    }
}
