/// Data Reader Module
///
/// A borrowed handle over the row cursor a tool has open.
use crate::core::db::command::Command;
use crate::core::db::connection::DbTool;
use crate::core::db::provider::{Provider, RowSource};
use crate::core::db::row::Row;
use crate::core::{DbError, Result};
use tracing::warn;

/// Forward-only cursor over the result of the tool's bound command.
///
/// Closing is idempotent and also happens on drop. When the cursor was
/// opened with `CLOSE_CONNECTION`, closing it closes the connection too.
pub struct DataReader<'t, P: Provider> {
    tool: &'t mut DbTool<P>,
    closed: bool,
}

impl<'t, P: Provider> DataReader<'t, P> {
    pub(crate) fn new(tool: &'t mut DbTool<P>) -> Self {
        DataReader {
            tool,
            closed: false,
        }
    }

    /// Advances to the next row.
    pub fn read(&mut self) -> Result<bool> {
        if self.closed {
            return Err(DbError::InvalidArgument(
                "cannot read from a closed data reader".to_string(),
            ));
        }
        self.tool.read_row()
    }

    /// The row the reader is positioned on.
    pub fn row(&self) -> Result<Row<'_>> {
        if self.closed {
            return Err(DbError::InvalidArgument(
                "cannot access a row of a closed data reader".to_string(),
            ));
        }
        self.tool.current_row()
    }

    pub fn field_count(&self) -> usize {
        self.tool
            .connection()
            .map(|c| c.field_count())
            .unwrap_or(0)
    }

    pub fn command(&self) -> &Command {
        self.tool.command()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tool.close_reader()
    }
}

impl<P: Provider> Drop for DataReader<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error while closing data reader: {}", e);
        }
    }
}
