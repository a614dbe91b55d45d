use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::{Identity, Role};

/// Load or generate the identity token secret (256-bit random key).
/// Key is stored as raw bytes in data_dir/identity_secret and shared with
/// the identity collaborator out of band.
pub fn load_or_generate_identity_secret(
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("identity_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Identity secret loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("Identity secret has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Identity secret generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an identity token. Used by the identity collaborator and tests.
pub fn issue_identity_token(
    secret: &[u8],
    user_id: &str,
    name: &str,
    role: Role,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Identity {
        sub: user_id.to_string(),
        name: name.to_string(),
        role,
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate an identity token and return its claims.
pub fn validate_identity_token(
    secret: &[u8],
    token: &str,
) -> Result<Identity, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Identity>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
