//! String commands
//!
//! Thin command layer over the `strs` LogManager.

use std::time::Duration;

use crate::error::{LotusError, Result};
use crate::logfile::DataType;
use crate::storage::{unix_now, LogManager};

use super::Engine;

impl Engine {
    fn strs(&self) -> Result<&LogManager> {
        self.ensure_open()?;
        Ok(self.store(DataType::String))
    }

    /// Get a value by key, `KeyNotFound` if it is absent or expired
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.strs()?.get(key)
    }

    /// Set `key` to `value` without expiry
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.strs()?.put(key, value, 0)
    }

    /// Set `key` to `value`, expiring after `ttl` (whole seconds)
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let ttl = i64::try_from(ttl.as_secs()).map_err(|_| LotusError::IntegerOverflow)?;
        let expired_at = unix_now()
            .checked_add(ttl)
            .ok_or(LotusError::IntegerOverflow)?;
        self.strs()?.put(key, value, expired_at)
    }

    /// Delete a key; deleting an absent key succeeds
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.strs()?.delete(key)
    }

    /// Set several keys from alternating `key, value` arguments
    pub fn mset(&self, args: &[&[u8]]) -> Result<()> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(LotusError::WrongNumberOfArgs);
        }

        let strs = self.strs()?;
        for pair in args.chunks_exact(2) {
            strs.put(pair[0], pair[1], 0)?;
        }
        Ok(())
    }

    /// Values of several keys, `None` for absent or expired ones
    pub fn mget(&self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let strs = self.strs()?;
        keys.iter()
            .map(|key| match strs.get(key) {
                Ok(value) => Ok(Some(value)),
                Err(LotusError::KeyNotFound) => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Add `delta` to the integer stored at `key` and return the result.
    ///
    /// A missing key counts as 0. Fails with `WrongValueType` if the stored
    /// value is not a decimal i64, or `IntegerOverflow`.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        let strs = self.strs()?;
        let _guard = self.strs_lock.lock();

        let current = match strs.get(key) {
            Ok(value) => parse_integer(&value)?,
            Err(LotusError::KeyNotFound) => 0,
            Err(e) => return Err(e),
        };
        let next = current
            .checked_add(delta)
            .ok_or(LotusError::IntegerOverflow)?;

        let expired_at = strs.location(key).map_or(0, |loc| loc.expired_at);
        strs.put(key, next.to_string().as_bytes(), expired_at)?;
        Ok(next)
    }

    /// Subtract `delta` from the integer stored at `key`
    pub fn decr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        let delta = delta.checked_neg().ok_or(LotusError::IntegerOverflow)?;
        self.incr_by(key, delta)
    }

    /// Up to `limit` key/value pairs whose keys start with `prefix`, in key
    /// order. Keys that expire during the scan are skipped.
    pub fn scan(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let strs = self.strs()?;
        let mut pairs = Vec::new();
        for key in strs.scan_keys(prefix, limit) {
            match strs.get(&key) {
                Ok(value) => pairs.push((key, value)),
                Err(LotusError::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(pairs)
    }
}

fn parse_integer(value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(LotusError::WrongValueType)
}
