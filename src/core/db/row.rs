/// Row Access Module
///
/// Typed column access for the row a cursor is positioned on, and the
/// per-fetch ordinal cache that memoizes name lookups.
use crate::core::db::provider::RowSource;
use crate::core::db::value::{convert, FromValue, Value};
use crate::core::{DbError, Result};
use std::collections::HashMap;

/// Column name to ordinal memo, scoped to a single fetch.
///
/// Names are compared case-insensitively. Misses recorded by the lenient
/// lookups are stored as `None` so they are not rescanned.
#[derive(Debug, Default, Clone)]
pub struct OrdinalCache {
    entries: HashMap<String, Option<usize>>,
}

impl OrdinalCache {
    pub fn new() -> Self {
        OrdinalCache::default()
    }

    /// `None` when the name was never looked up.
    pub fn get(&self, name: &str) -> Option<Option<usize>> {
        self.entries.get(&name.to_lowercase()).copied()
    }

    pub fn insert(&mut self, name: &str, index: Option<usize>) {
        self.entries.insert(name.to_lowercase(), index);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Anything that can identify a column of a row: an ordinal or a name.
pub trait ColumnIndex {
    fn resolve(&self, row: &Row<'_>) -> Result<usize>;

    /// Column identity used in conversion errors.
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn resolve(&self, row: &Row<'_>) -> Result<usize> {
        let field_count = row.field_count();
        if *self < field_count {
            Ok(*self)
        } else {
            Err(DbError::ColumnOutOfRange {
                index: *self,
                field_count,
            })
        }
    }

    fn describe(&self) -> String {
        format!("for column at ordinal position: {}", self)
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, row: &Row<'_>) -> Result<usize> {
        row.try_column_index(self)?
            .ok_or_else(|| DbError::ColumnNotFound(self.to_string()))
    }

    fn describe(&self) -> String {
        format!("for column: {}", self)
    }
}

/// View of the current row of an open cursor.
///
/// Only valid for the duration of a single read; the cursor it points at is
/// closed when the owning fetch ends.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    source: &'a dyn RowSource,
}

impl<'a> Row<'a> {
    pub fn new(source: &'a dyn RowSource) -> Self {
        Row { source }
    }

    pub fn field_count(&self) -> usize {
        self.source.field_count()
    }

    pub fn column_name(&self, index: usize) -> Option<&'a str> {
        self.source.field_name(index)
    }

    pub fn column_names(&self) -> Vec<String> {
        (0..self.field_count())
            .filter_map(|i| self.column_name(i).map(String::from))
            .collect()
    }

    /// Finds a column by name, ignoring case.
    ///
    /// Scans from the last column to the first and reports a miss as `None`.
    pub fn try_column_index(&self, name: &str) -> Result<Option<usize>> {
        check_column_name(name)?;

        let wanted = name.to_lowercase();
        Ok((0..self.field_count()).rev().find(|&i| {
            self.source
                .field_name(i)
                .map(|n| n.to_lowercase() == wanted)
                .unwrap_or(false)
        }))
    }

    /// Raw value of a column, without conversion.
    pub fn value(&self, column: impl ColumnIndex) -> Result<Value> {
        let index = column.resolve(self)?;
        self.source.field_value(index)
    }

    /// Reads a column by ordinal or name and converts it to `T`.
    ///
    /// Database-null yields `T::default()`. An unknown name fails with
    /// `ColumnNotFound`.
    pub fn get<T: FromValue + Default>(&self, column: impl ColumnIndex) -> Result<T> {
        let index = column.resolve(self)?;
        self.convert_at(index, || column.describe())
    }

    /// Strict lookup by name; an unknown name fails with `ColumnNotFound`.
    pub fn get_by_name<T: FromValue + Default>(&self, name: &str) -> Result<T> {
        self.get(name)
    }

    /// Like [`Row::get`] by name, memoizing the ordinal in `cache`.
    pub fn get_cached<T: FromValue + Default>(
        &self,
        name: &str,
        cache: &mut OrdinalCache,
    ) -> Result<T> {
        check_column_name(name)?;

        let index = match cache.get(name).flatten() {
            Some(index) => index,
            None => {
                let index = self
                    .try_column_index(name)?
                    .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))?;
                cache.insert(name, Some(index));
                index
            }
        };

        self.convert_at(index, || name.describe())
    }

    /// Reads a column by name; a column that does not exist yields
    /// `T::default()` instead of an error.
    pub fn get_or_default<T: FromValue + Default>(&self, name: &str) -> Result<T> {
        match self.try_column_index(name)? {
            Some(index) => self.convert_at(index, || name.describe()),
            None => Ok(T::default()),
        }
    }

    /// Like [`Row::get_or_default`], memoizing hits and misses in `cache`.
    pub fn get_or_default_cached<T: FromValue + Default>(
        &self,
        name: &str,
        cache: &mut OrdinalCache,
    ) -> Result<T> {
        check_column_name(name)?;

        let index = match cache.get(name) {
            Some(index) => index,
            None => {
                let index = self.try_column_index(name)?;
                cache.insert(name, index);
                index
            }
        };

        match index {
            Some(index) => self.convert_at(index, || name.describe()),
            None => Ok(T::default()),
        }
    }

    fn convert_at<T: FromValue + Default>(
        &self,
        index: usize,
        describe: impl FnOnce() -> String,
    ) -> Result<T> {
        let value = self.source.field_value(index)?;
        convert(value).map_err(|source| DbError::Conversion {
            context: describe(),
            source,
        })
    }
}

fn check_column_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DbError::InvalidArgument(
            "columnName cannot be null, empty or whitespace.".to_string(),
        ));
    }
    Ok(())
}
