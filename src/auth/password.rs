use crate::error::AppError;

pub fn hash_password(plaintext: &str, cost: u32) -> Result<String, AppError> {
    bcrypt::hash(plaintext, cost)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Constant-time check via bcrypt; a malformed stored hash never matches.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}
