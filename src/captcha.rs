//! Human check shown on the payment stage
//!
//! A lightweight anti-automation gate, not a security boundary. A failed
//! verification keeps the same code on screen. The form drops the challenge
//! once a submission is accepted, so a code is never verified twice.

use rand::Rng;

pub const CAPTCHA_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const CAPTCHA_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptchaError {
    #[error("Invalid CAPTCHA")]
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    code: String,
}

impl CaptchaChallenge {
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..CAPTCHA_LEN)
            .map(|_| CAPTCHA_ALPHABET[rng.gen_range(0..CAPTCHA_ALPHABET.len())] as char)
            .collect();
        Self { code }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Exact, case-sensitive comparison against the displayed code.
    pub fn verify(&self, input: &str) -> Result<(), CaptchaError> {
        if input == self.code {
            Ok(())
        } else {
            Err(CaptchaError::Mismatch)
        }
    }
}
