use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::CourierAvailability;
use crate::models::order::Order;
use crate::models::partner::Partner;

/// Fixture data for running the service without the relational store.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub partners: Vec<Partner>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub couriers: Vec<CourierAvailability>,
    #[serde(default)]
    pub customers: Vec<CustomerContact>,
    #[serde(default)]
    pub chats: Vec<ChatRoom>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerContact {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub members: Vec<Uuid>,
}

pub async fn load_seed(path: &Path) -> Result<Seed, AppError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::Internal(format!("failed to read {}: {err}", path.display())))?;

    serde_json::from_str(&raw)
        .map_err(|err| AppError::Internal(format!("invalid seed file {}: {err}", path.display())))
}
