//! Secret operations for MockContaboClient

use super::MockContaboClient;
use crate::error::ContaboError;
use crate::models::*;

pub fn list_secrets(
    client: &MockContaboClient,
    name: Option<&str>,
    secret_type: Option<SecretType>,
) -> Result<Vec<Secret>, ContaboError> {
    client.record("list_secrets")?;
    Ok(client
        .secrets
        .lock()
        .unwrap()
        .values()
        .filter(|s| name.is_none_or(|name| s.name == name))
        .filter(|s| secret_type.is_none_or(|t| s.secret_type == t))
        .cloned()
        .collect())
}

pub fn get_secret(client: &MockContaboClient, secret_id: i64) -> Result<Secret, ContaboError> {
    client.record("get_secret")?;
    client
        .secrets
        .lock()
        .unwrap()
        .get(&secret_id)
        .cloned()
        .ok_or_else(|| ContaboError::NotFound(format!("Secret {} not found", secret_id)))
}

pub fn create_secret(
    client: &MockContaboClient,
    request: &CreateSecretRequest,
) -> Result<Secret, ContaboError> {
    client.record("create_secret")?;
    let id = client.next_id();
    let secret = Secret {
        secret_id: id,
        name: request.name.clone(),
        value: request.value.clone(),
        secret_type: request.secret_type,
        created_at: None,
        updated_at: None,
    };
    client.secrets.lock().unwrap().insert(id, secret.clone());
    Ok(secret)
}

pub fn delete_secret(client: &MockContaboClient, secret_id: i64) -> Result<(), ContaboError> {
    client.record("delete_secret")?;
    client
        .secrets
        .lock()
        .unwrap()
        .remove(&secret_id)
        .map(|_| ())
        .ok_or_else(|| ContaboError::NotFound(format!("Secret {} not found", secret_id)))
}
