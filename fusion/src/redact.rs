//! Redaction of sensitive values in excerpts and citations.
//!
//! Masking keeps separators and the last few digits so a reviewer can still
//! tell two values apart (`123-45-6789` → `***-**-6789`). The same rules are
//! applied again when citations are aggregated, so an excerpt that slipped
//! through with a raw number is caught before it leaves the pipeline.

use crate::errors::{FusionError, Result};
use regex::Regex;
use std::borrow::Cow;

/// Character used in place of a masked value character
pub const MASK: char = '*';

/// Mask every alphanumeric in `value` except the last `keep_suffix_digits`
/// digits. Separators and whitespace are preserved.
pub fn mask_value(value: &str, keep_suffix_digits: usize) -> String {
    let digit_count = value.chars().filter(char::is_ascii_digit).count();
    let mut visible_from = digit_count.saturating_sub(keep_suffix_digits);
    if digit_count == 0 {
        visible_from = usize::MAX;
    }

    let mut seen_digits = 0usize;
    value
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                seen_digits += 1;
                if seen_digits > visible_from { c } else { MASK }
            } else if c.is_alphanumeric() {
                MASK
            } else {
                c
            }
        })
        .collect()
}

/// Detects and masks raw sensitive values left in free text.
#[derive(Debug, Clone)]
pub struct Redactor {
    keep_suffix_digits: usize,
    digit_run: Regex,
    email: Regex,
}

impl Redactor {
    pub fn new(keep_suffix_digits: usize) -> Result<Self> {
        let digit_run = Regex::new(r"\d(?:[ .-]?\d)*")
            .map_err(|e| FusionError::config_with_source("invalid redaction pattern", e))?;
        let email = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .map_err(|e| FusionError::config_with_source("invalid redaction pattern", e))?;
        Ok(Self {
            keep_suffix_digits,
            digit_run,
            email,
        })
    }

    /// Mask a single value with this redactor's suffix length.
    pub fn mask(&self, value: &str) -> String {
        mask_value(value, self.keep_suffix_digits)
    }

    fn is_long_run(&self, run: &str) -> bool {
        run.chars().filter(char::is_ascii_digit).count() > self.keep_suffix_digits
    }

    /// True when `text` still contains a digit run longer than the visible
    /// suffix or a raw email address.
    pub fn exposes_raw(&self, text: &str) -> bool {
        self.email.is_match(text)
            || self
                .digit_run
                .find_iter(text)
                .any(|m| self.is_long_run(m.as_str()))
    }

    /// Mask every exposing value in `text`; borrowed when nothing changes.
    pub fn scrub<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.exposes_raw(text) {
            return Cow::Borrowed(text);
        }
        let without_emails = self
            .email
            .replace_all(text, |caps: &regex::Captures<'_>| self.mask(&caps[0]));
        let scrubbed = self
            .digit_run
            .replace_all(&without_emails, |caps: &regex::Captures<'_>| {
                let run = &caps[0];
                if self.is_long_run(run) {
                    self.mask(run)
                } else {
                    run.to_string()
                }
            })
            .into_owned();
        Cow::Owned(scrubbed)
    }
}
