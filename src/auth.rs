use thiserror::Error;

use crate::config::Secret;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Please enter a valid passcode to access the application.")]
pub struct AuthorizationError;

/// Shared-secret gate in front of the generation surface.
#[derive(Debug, Clone)]
pub struct PasscodeGate {
    passcode: Secret,
}

impl PasscodeGate {
    pub fn new(passcode: Secret) -> Self {
        Self { passcode }
    }

    pub fn check(&self, input: &str) -> Result<(), AuthorizationError> {
        if constant_time_eq(input.as_bytes(), self.passcode.expose().as_bytes()) {
            Ok(())
        } else {
            Err(AuthorizationError)
        }
    }
}

// Only the length leaks; content comparison touches every byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
