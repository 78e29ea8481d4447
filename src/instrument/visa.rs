//! VISA-backed transport.
//!
//! Wraps a `visa-rs` session behind [`ScpiTransport`]. The VISA calls are
//! blocking library calls into the installed VISA stack, so each one runs on
//! the blocking pool. Commands and queries are newline-terminated; replies
//! are read to the first line ending, matching the GPIB instruments on the
//! rig.

use crate::error::{RigError, RigResult};
use crate::instrument::ScpiTransport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visa_rs::prelude::*;

pub struct VisaTransport {
    resource: String,
    // visa-rs sessions are not internally synchronized; one command or
    // query at a time per instrument.
    instr: Arc<Mutex<Instrument>>,
    // Keeps the resource manager alive for the session's lifetime.
    _rm: DefaultRM,
}

impl VisaTransport {
    /// Reserve a VISA resource. Failure to open is a Connection error
    /// carrying the resource string the operator configured.
    pub fn open(resource: &str, timeout: Duration) -> RigResult<Self> {
        let open = || -> Result<(DefaultRM, Instrument)> {
            let rm = DefaultRM::new().context("VISA resource manager unavailable")?;
            let name = CString::new(resource).context("resource string contains NUL")?;
            let instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .context("open failed")?;
            Ok((rm, instr))
        };

        match open() {
            Ok((rm, instr)) => Ok(Self {
                resource: resource.to_string(),
                instr: Arc::new(Mutex::new(instr)),
                _rm: rm,
            }),
            Err(source) => Err(RigError::Connection {
                resource: resource.to_string(),
                source,
            }),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn write_blocking(instr: &Mutex<Instrument>, command: &str) -> Result<()> {
        let mut guard = instr
            .lock()
            .map_err(|_| anyhow!("VISA session poisoned by an earlier panic"))?;
        guard
            .write_all(format!("{command}\n").as_bytes())
            .with_context(|| format!("write failed for '{command}'"))?;
        Ok(())
    }

    fn query_blocking(instr: &Mutex<Instrument>, command: &str) -> Result<String> {
        let mut guard = instr
            .lock()
            .map_err(|_| anyhow!("VISA session poisoned by an earlier panic"))?;
        guard
            .write_all(format!("{command}\n").as_bytes())
            .with_context(|| format!("write failed for '{command}'"))?;

        let mut reply = String::new();
        let mut reader = BufReader::new(&*guard);
        reader
            .read_line(&mut reply)
            .with_context(|| format!("read failed for '{command}'"))?;
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl ScpiTransport for VisaTransport {
    async fn query(&self, command: &str) -> Result<String> {
        let instr = Arc::clone(&self.instr);
        let command = command.to_string();
        tokio::task::spawn_blocking(move || Self::query_blocking(&instr, &command))
            .await
            .context("VISA query task failed")?
    }

    async fn command(&self, command: &str) -> Result<()> {
        let instr = Arc::clone(&self.instr);
        let command = command.to_string();
        tokio::task::spawn_blocking(move || Self::write_blocking(&instr, &command))
            .await
            .context("VISA command task failed")?
    }
}
