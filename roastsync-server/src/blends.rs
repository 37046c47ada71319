//! Blend recipes
//!
//! A recipe lists at least two distinct coffees with whole percentages
//! (1 to 100) summing to exactly 100.

use crate::db::coffees;
use roastsync_common::db::{Blend, BlendComponent};
use roastsync_common::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use uuid::Uuid;

pub const MIN_COMPONENTS: usize = 2;

/// Reject recipes that cannot describe a physical blend
pub fn validate_recipe(recipe: &[BlendComponent]) -> Result<()> {
    if recipe.len() < MIN_COMPONENTS {
        return Err(Error::InvalidInput(format!(
            "recipe must have at least {} components",
            MIN_COMPONENTS
        )));
    }

    let mut seen = HashSet::new();
    for component in recipe {
        if !(1..=100).contains(&component.percentage) {
            return Err(Error::InvalidInput(format!(
                "percentage {} for coffee {} is outside 1..=100",
                component.percentage, component.coffee_id
            )));
        }
        if !seen.insert(component.coffee_id) {
            return Err(Error::InvalidInput(format!(
                "recipe lists coffee {} more than once",
                component.coffee_id
            )));
        }
    }

    let total: i64 = recipe.iter().map(|c| c.percentage).sum();
    if total != 100 {
        return Err(Error::InvalidInput(format!(
            "recipe percentages must sum to 100 (got {})",
            total
        )));
    }
    Ok(())
}

/// Largest blend quantity the given (stock, percentage) pairs can supply,
/// rounded to grams; zero when the list is empty
pub fn available_weight(components: &[(Decimal, i64)]) -> Decimal {
    components
        .iter()
        .filter(|(_, pct)| *pct > 0)
        .map(|(stock, pct)| *stock * Decimal::ONE_HUNDRED / Decimal::from(*pct))
        .min()
        .map(|w| w.round_dp(3))
        .unwrap_or(Decimal::ZERO)
}

/// Every recipe coffee must exist
pub async fn ensure_coffees_exist(conn: &mut SqliteConnection, recipe: &[BlendComponent]) -> Result<()> {
    for component in recipe {
        if coffees::get(conn, component.coffee_id).await?.is_none() {
            return Err(Error::InvalidInput(format!(
                "Coffee with id {} not found",
                component.coffee_id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeLine {
    pub coffee_id: Uuid,
    pub percentage: i64,
    pub coffee_name: String,
}

/// Blend with resolved coffee names and current availability
#[derive(Debug, Clone, Serialize)]
pub struct BlendDetail {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub recipe: Vec<RecipeLine>,
    pub available_weight_kg: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub async fn detail(conn: &mut SqliteConnection, blend: &Blend) -> Result<BlendDetail> {
    let mut recipe = Vec::with_capacity(blend.recipe.len());
    let mut stocks = Vec::with_capacity(blend.recipe.len());

    for component in &blend.recipe {
        let coffee = coffees::get(conn, component.coffee_id).await?;
        if let Some(c) = &coffee {
            stocks.push((c.stock_weight_kg, component.percentage));
        }
        recipe.push(RecipeLine {
            coffee_id: component.coffee_id,
            percentage: component.percentage,
            coffee_name: coffee.map(|c| c.label).unwrap_or_else(|| "Unknown".to_string()),
        });
    }

    Ok(BlendDetail {
        id: blend.id,
        user_id: blend.user_id,
        name: blend.name.clone(),
        description: blend.description.clone(),
        recipe,
        available_weight_kg: available_weight(&stocks).to_f64().unwrap_or(0.0),
        created_at: blend.created_at,
        updated_at: blend.updated_at,
    })
}
