use rand::{distributions::Alphanumeric, thread_rng, Rng};

pub const LINK_TOKEN_LENGTH: usize = 40;
pub const SESSION_CODE_LENGTH: usize = 8;

pub fn generate_access_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Human-readable session code: uppercase letters and digits.
pub fn generate_session_code() -> String {
    generate_access_token(SESSION_CODE_LENGTH).to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_code_is_uppercase_alphanumeric() {
        let code = generate_session_code();
        assert_eq!(code.len(), SESSION_CODE_LENGTH);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
