//! Command output: pretty JSON on stdout, or a plain rendering with `--raw`

use anyhow::Result;
use serde::Serialize;

pub struct Output {
    raw: bool,
}

impl Output {
    pub fn new(raw: bool) -> Self {
        Self { raw }
    }

    /// Prints `value` as JSON, or `plain()` when raw output was requested.
    pub fn emit<T, F>(&self, value: &T, plain: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&T) -> String,
    {
        if self.raw {
            println!("{}", plain(value));
        } else {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(())
    }
}
