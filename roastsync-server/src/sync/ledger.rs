//! Green coffee stock ledger
//!
//! Callers run these inside a `BEGIN IMMEDIATE` transaction, so every read
//! of a stock balance already holds the database write lock until commit.
//! A single coffee is charged the requested amount as sent; blend shares
//! are rounded to grams. The recorded snapshot is exactly what left the
//! shelf and exactly what a delete puts back.

use super::identity::RoastSource;
use super::normalizer::decimal;
use crate::db::{batches, coffees};
use roastsync_common::db::{BatchStatus, DeductedComponent, Roast};
use roastsync_common::Result;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

const QUANTITY_DP: u32 = 3;

fn grams(kg: Decimal) -> Decimal {
    kg.round_dp(QUANTITY_DP)
}

/// Take `quantity` from one coffee if the whole amount is on the shelf
async fn take(conn: &mut SqliteConnection, coffee_id: Uuid, quantity: Decimal) -> Result<bool> {
    let coffee = match coffees::get(conn, coffee_id).await? {
        Some(c) => c,
        None => {
            warn!("Coffee {} vanished before deduction", coffee_id);
            return Ok(false);
        }
    };
    if coffee.stock_weight_kg < quantity {
        warn!(
            "Insufficient stock for coffee {} ({}): {} < {}",
            coffee.hr_id, coffee.id, coffee.stock_weight_kg, quantity
        );
        return Ok(false);
    }
    coffees::set_stock(conn, coffee.id, coffee.stock_weight_kg - quantity).await?;
    Ok(true)
}

/// Deduct stock for a new roast of `amount` kg
///
/// A single coffee is all or nothing. Blend components are deducted one by
/// one, and a short component is skipped without affecting the others.
pub async fn deduct(
    conn: &mut SqliteConnection,
    source: &RoastSource,
    amount: Decimal,
) -> Result<Vec<DeductedComponent>> {
    let mut deducted = Vec::new();
    if amount <= Decimal::ZERO {
        return Ok(deducted);
    }

    match source {
        RoastSource::Coffee(coffee) => {
            if take(conn, coffee.id, amount).await? {
                deducted.push(DeductedComponent {
                    coffee_id: coffee.id,
                    deducted_weight_kg: amount,
                });
            }
        }
        RoastSource::Blend(blend) => {
            for component in &blend.recipe {
                let quantity =
                    grams(amount * Decimal::from(component.percentage) / Decimal::ONE_HUNDRED);
                if quantity <= Decimal::ZERO {
                    continue;
                }
                if take(conn, component.coffee_id, quantity).await? {
                    deducted.push(DeductedComponent {
                        coffee_id: component.coffee_id,
                        deducted_weight_kg: quantity,
                    });
                }
            }
        }
        RoastSource::InlineBlend(spec) => {
            let ingredients = spec
                .get("ingredients")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for ingredient in &ingredients {
                let hr_id = ingredient
                    .get("coffee")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty());
                let ratio = ingredient.get("ratio").and_then(decimal);
                let (hr_id, ratio) = match (hr_id, ratio) {
                    (Some(h), Some(r)) if r > Decimal::ZERO => (h, r),
                    _ => {
                        debug!("Skipping unusable inline blend ingredient {}", ingredient);
                        continue;
                    }
                };
                let coffee = match coffees::get_by_hr_id(conn, hr_id).await? {
                    Some(c) => c,
                    None => {
                        warn!("Inline blend ingredient '{}' is not a known coffee; skipped", hr_id);
                        continue;
                    }
                };
                let quantity = grams(amount * ratio);
                if quantity > Decimal::ZERO && take(conn, coffee.id, quantity).await? {
                    deducted.push(DeductedComponent {
                        coffee_id: coffee.id,
                        deducted_weight_kg: quantity,
                    });
                }
            }
        }
        RoastSource::Unspecified => {}
    }

    Ok(deducted)
}

/// Put back exactly what a roast's snapshot recorded
pub async fn restore(conn: &mut SqliteConnection, components: &[DeductedComponent]) -> Result<()> {
    for component in components {
        match coffees::get(conn, component.coffee_id).await? {
            Some(coffee) => {
                coffees::set_stock(
                    conn,
                    coffee.id,
                    coffee.stock_weight_kg + component.deducted_weight_kg,
                )
                .await?;
            }
            None => warn!(
                "Cannot restore {} kg to missing coffee {}",
                component.deducted_weight_kg, component.coffee_id
            ),
        }
    }
    Ok(())
}

/// Draw a new roast from its production batch
///
/// Returns the quantity actually taken, which may be less than `amount`
/// when the lot is nearly empty, or `None` for an unknown batch.
pub async fn draw_from_batch(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    amount: Decimal,
    roasted: Option<Decimal>,
) -> Result<Option<Decimal>> {
    let mut batch = match batches::get(conn, batch_id).await? {
        Some(b) => b,
        None => {
            warn!("Roast references unknown batch {}", batch_id);
            return Ok(None);
        }
    };

    let wanted = grams(amount.max(Decimal::ZERO));
    let taken = wanted.min(batch.current_weight_kg.max(Decimal::ZERO));
    if taken < wanted {
        warn!(
            "Batch {} holds {} kg, roast needs {} kg; drawing what is left",
            batch.lot_number, batch.current_weight_kg, wanted
        );
    }

    batch.current_weight_kg -= taken;
    if let Some(roasted) = roasted {
        batch.roasted_total_weight_kg += roasted;
    }
    if batch.current_weight_kg <= Decimal::ZERO {
        batch.status = BatchStatus::Depleted;
        info!("Batch {} depleted", batch.lot_number);
    }
    batches::save_weights(conn, &batch).await?;
    Ok(Some(taken))
}

/// Reverse a roast's batch effect
pub async fn return_to_batch(conn: &mut SqliteConnection, roast: &Roast) -> Result<()> {
    let batch_id = match roast.batch_id {
        Some(id) => id,
        None => return Ok(()),
    };
    let mut batch = match batches::get(conn, batch_id).await? {
        Some(b) => b,
        None => {
            warn!("Batch {} of roast {} no longer exists", batch_id, roast.id);
            return Ok(());
        }
    };

    batch.current_weight_kg += roast.batch_deducted_kg.unwrap_or(Decimal::ZERO);
    if let Some(roasted) = roast.roasted_weight_kg {
        let remaining = batch.roasted_total_weight_kg - roasted;
        if remaining < Decimal::ZERO {
            warn!(
                "Batch {} roasted total would go negative ({}); clamping to zero",
                batch.lot_number, remaining
            );
        }
        batch.roasted_total_weight_kg = remaining.max(Decimal::ZERO);
    }
    if batch.status == BatchStatus::Depleted && batch.current_weight_kg > Decimal::ZERO {
        batch.status = BatchStatus::Active;
    }
    batches::save_weights(conn, &batch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use chrono::Utc;
    use roastsync_common::db::{Batch, Blend, BlendComponent, Coffee};
    use serde_json::json;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn coffee(conn: &mut SqliteConnection, hr_id: &str, stock: &str) -> Coffee {
        let c = Coffee {
            id: Uuid::new_v4(),
            hr_id: hr_id.into(),
            label: hr_id.into(),
            origin: None,
            region: None,
            variety: None,
            processing: None,
            stock_weight_kg: d(stock),
            created_at: Utc::now(),
        };
        coffees::insert(conn, &c).await.unwrap();
        c
    }

    async fn stock(conn: &mut SqliteConnection, id: Uuid) -> Decimal {
        coffees::get(conn, id).await.unwrap().unwrap().stock_weight_kg
    }

    #[tokio::test]
    async fn test_single_coffee_deduct_then_restore_is_identity() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let c = coffee(&mut conn, "C1001", "10.0").await;

        let snapshot = deduct(&mut conn, &RoastSource::Coffee(c.clone()), d("2.5")).await.unwrap();
        assert_eq!(snapshot, vec![DeductedComponent { coffee_id: c.id, deducted_weight_kg: d("2.5") }]);
        assert_eq!(stock(&mut conn, c.id).await, d("7.5"));

        restore(&mut conn, &snapshot).await.unwrap();
        assert_eq!(stock(&mut conn, c.id).await, d("10.0"));
    }

    #[tokio::test]
    async fn test_single_coffee_short_deducts_nothing() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let c = coffee(&mut conn, "C1", "1.0").await;

        let snapshot = deduct(&mut conn, &RoastSource::Coffee(c.clone()), d("2.5")).await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(stock(&mut conn, c.id).await, d("1.0"));
    }

    #[tokio::test]
    async fn test_single_coffee_exact_stock_is_enough() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let c = coffee(&mut conn, "C2", "2.4996").await;

        let snapshot = deduct(&mut conn, &RoastSource::Coffee(c.clone()), d("2.4996")).await.unwrap();
        assert_eq!(snapshot, vec![DeductedComponent { coffee_id: c.id, deducted_weight_kg: d("2.4996") }]);
        assert_eq!(stock(&mut conn, c.id).await, Decimal::ZERO);

        restore(&mut conn, &snapshot).await.unwrap();
        assert_eq!(stock(&mut conn, c.id).await.to_string(), "2.4996");
    }

    #[tokio::test]
    async fn test_single_coffee_uses_unrounded_amount() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        // Stock sits between the request and its gram rounding
        let short = coffee(&mut conn, "C3", "2.5001").await;
        let snapshot = deduct(&mut conn, &RoastSource::Coffee(short.clone()), d("2.5004")).await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(stock(&mut conn, short.id).await, d("2.5001"));

        let enough = coffee(&mut conn, "C4", "2.4998").await;
        let snapshot = deduct(&mut conn, &RoastSource::Coffee(enough.clone()), d("2.4996")).await.unwrap();
        assert_eq!(snapshot, vec![DeductedComponent { coffee_id: enough.id, deducted_weight_kg: d("2.4996") }]);
        assert_eq!(stock(&mut conn, enough.id).await, d("0.0002"));
    }

    #[tokio::test]
    async fn test_blend_skips_short_component_only() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let a = coffee(&mut conn, "A", "1").await;
        let b = coffee(&mut conn, "B", "10").await;
        let blend = Blend {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "House".into(),
            description: None,
            recipe: vec![
                BlendComponent { coffee_id: a.id, percentage: 60 },
                BlendComponent { coffee_id: b.id, percentage: 40 },
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let snapshot = deduct(&mut conn, &RoastSource::Blend(blend), d("5")).await.unwrap();
        assert_eq!(snapshot, vec![DeductedComponent { coffee_id: b.id, deducted_weight_kg: d("2.0") }]);
        assert_eq!(stock(&mut conn, a.id).await, d("1"));
        assert_eq!(stock(&mut conn, b.id).await, d("8"));
    }

    #[tokio::test]
    async fn test_inline_blend_resolves_by_hr_id() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let a = coffee(&mut conn, "K1", "5").await;
        let spec = json!({
            "label": "Ad hoc",
            "ingredients": [
                {"coffee": "K1", "ratio": 0.3333},
                {"coffee": "MISSING", "ratio": 0.5},
                {"coffee": "K1", "ratio": 0}
            ]
        });

        let snapshot = deduct(&mut conn, &RoastSource::InlineBlend(spec), d("3")).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].deducted_weight_kg, d("1.000"));
        assert_eq!(stock(&mut conn, a.id).await, d("4"));
    }

    #[tokio::test]
    async fn test_batch_draw_and_return() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let batch = Batch {
            id: Uuid::new_v4(),
            coffee_id: None,
            lot_number: "LOT-1".into(),
            initial_weight_kg: d("3"),
            current_weight_kg: d("3"),
            roasted_total_weight_kg: d("0"),
            status: BatchStatus::Active,
        };
        batches::insert(&mut conn, &batch).await.unwrap();

        let taken = draw_from_batch(&mut conn, batch.id, d("3"), Some(d("2.5"))).await.unwrap();
        assert_eq!(taken, Some(d("3")));
        let after = batches::get(&mut conn, batch.id).await.unwrap().unwrap();
        assert_eq!(after.status, BatchStatus::Depleted);
        assert_eq!(after.roasted_total_weight_kg, d("2.5"));

        let mut roast = crate::profile::resolver::tests::sample_roast();
        roast.batch_id = Some(batch.id);
        roast.batch_deducted_kg = taken;
        roast.roasted_weight_kg = Some(d("4"));
        return_to_batch(&mut conn, &roast).await.unwrap();

        let restored = batches::get(&mut conn, batch.id).await.unwrap().unwrap();
        assert_eq!(restored.current_weight_kg, d("3"));
        assert_eq!(restored.roasted_total_weight_kg, Decimal::ZERO);
        assert_eq!(restored.status, BatchStatus::Active);
    }
}
