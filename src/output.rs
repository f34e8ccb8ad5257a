use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ToolError, ToolResult};

pub struct JsonOutput;

impl JsonOutput {
    /// Prints either the tool's result or its `{"error": ...}` payload.
    pub fn print_result<T: Serialize>(result: &ToolResult<T>) -> io::Result<()> {
        match result {
            Ok(value) => Self::print_json(value),
            Err(err) => Self::print_error(err),
        }
    }

    pub fn print_error(err: &ToolError) -> io::Result<()> {
        Self::print_json(err)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
