//! What a roast was made from
//!
//! Exactly one source applies per roast, in precedence order: a single
//! coffee, an inline blend carried in the payload, a stored blend owned by
//! the caller, or nothing.

use super::normalizer::{BlendField, NormalizedRoast};
use crate::db::{blends, coffees};
use chrono::Utc;
use roastsync_common::db::{Blend, Coffee};
use roastsync_common::{uuid_utils, Result};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum RoastSource {
    Coffee(Coffee),
    /// Ad-hoc blend spec; components are resolved by human-readable id
    InlineBlend(Value),
    Blend(Blend),
    Unspecified,
}

impl RoastSource {
    pub fn coffee_id(&self) -> Option<Uuid> {
        match self {
            RoastSource::Coffee(c) => Some(c.id),
            _ => None,
        }
    }

    pub fn blend_id(&self) -> Option<Uuid> {
        match self {
            RoastSource::Blend(b) => Some(b.id),
            _ => None,
        }
    }
}

/// Coffee with `hr_id`, creating a placeholder when it is unknown
pub async fn find_or_create_coffee(
    conn: &mut SqliteConnection,
    hr_id: &str,
    label: Option<&str>,
    origin: Option<&str>,
    placeholder_stock: Decimal,
) -> Result<Coffee> {
    if let Some(coffee) = coffees::get_by_hr_id(conn, hr_id).await? {
        return Ok(coffee);
    }

    info!("Coffee with hr_id '{}' not found, creating placeholder", hr_id);
    let coffee = Coffee {
        id: uuid_utils::generate(),
        hr_id: hr_id.to_string(),
        label: label.unwrap_or(hr_id).to_string(),
        origin: Some(origin.unwrap_or("Unknown").to_string()),
        region: None,
        variety: None,
        processing: None,
        stock_weight_kg: placeholder_stock,
        created_at: Utc::now(),
    };
    coffees::insert(conn, &coffee).await?;
    Ok(coffee)
}

/// Pick the roast source for a new roast
pub async fn resolve_source(
    conn: &mut SqliteConnection,
    roast: &NormalizedRoast,
    user_id: Uuid,
    placeholder_stock: Decimal,
) -> Result<RoastSource> {
    if let Some(hr_id) = roast.coffee.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let coffee = find_or_create_coffee(
            conn,
            hr_id,
            roast.bean.as_deref(),
            roast.origin.as_deref(),
            placeholder_stock,
        )
        .await?;
        return Ok(RoastSource::Coffee(coffee));
    }

    match &roast.blend {
        BlendField::Inline(spec) => Ok(RoastSource::InlineBlend(spec.clone())),
        BlendField::Reference(text) => {
            let id = match uuid_utils::parse(text) {
                Ok(id) => id,
                Err(_) => {
                    debug!("Blend reference '{}' is not an id; roast has no source", text);
                    return Ok(RoastSource::Unspecified);
                }
            };
            match blends::get_owned(conn, id, user_id).await? {
                Some(blend) => Ok(RoastSource::Blend(blend)),
                None => {
                    debug!("Blend {} not found for user {}", id, user_id);
                    Ok(RoastSource::Unspecified)
                }
            }
        }
        BlendField::Absent => Ok(RoastSource::Unspecified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::sync::normalizer::normalize;
    use roastsync_common::config::anonymous_user;
    use roastsync_common::db::BlendComponent;
    use serde_json::json;
    use std::str::FromStr;

    const ROAST_ID: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";

    fn payload(extra: Value) -> NormalizedRoast {
        let mut doc = json!({"roast_id": ROAST_ID});
        for (k, v) in extra.as_object().unwrap() {
            doc[k] = v.clone();
        }
        normalize(doc.as_object().cloned().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_coffee_gets_placeholder_stock() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let stock = Decimal::from_str("1000").unwrap();

        let roast = payload(json!({"coffee": "C7777", "bean": "Guji"}));
        let source = resolve_source(&mut conn, &roast, anonymous_user(), stock).await.unwrap();
        let coffee = match source {
            RoastSource::Coffee(c) => c,
            other => panic!("unexpected source {:?}", other),
        };
        assert_eq!(coffee.label, "Guji");
        assert_eq!(coffee.origin.as_deref(), Some("Unknown"));
        assert_eq!(coffee.stock_weight_kg, stock);

        // Second resolution finds the same row
        let again = find_or_create_coffee(&mut conn, "C7777", None, None, stock).await.unwrap();
        assert_eq!(again.id, coffee.id);
    }

    #[tokio::test]
    async fn test_coffee_wins_over_blend() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let roast = payload(json!({
            "coffee": "C1",
            "blend": {"label": "House", "ingredients": []}
        }));
        let source = resolve_source(&mut conn, &roast, anonymous_user(), Decimal::ONE).await.unwrap();
        assert!(matches!(source, RoastSource::Coffee(_)));
    }

    #[tokio::test]
    async fn test_blend_reference_must_be_owned() {
        let (pool, _dir) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let owner = anonymous_user();
        let blend = Blend {
            id: Uuid::new_v4(),
            user_id: owner,
            name: "House".into(),
            description: None,
            recipe: vec![
                BlendComponent { coffee_id: Uuid::new_v4(), percentage: 50 },
                BlendComponent { coffee_id: Uuid::new_v4(), percentage: 50 },
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        blends::insert(&mut conn, &blend).await.unwrap();

        let roast = payload(json!({"blend": blend.id.to_string()}));
        let mine = resolve_source(&mut conn, &roast, owner, Decimal::ONE).await.unwrap();
        assert_eq!(mine.blend_id(), Some(blend.id));

        let theirs = resolve_source(&mut conn, &roast, Uuid::new_v4(), Decimal::ONE).await.unwrap();
        assert!(matches!(theirs, RoastSource::Unspecified));

        let by_name = payload(json!({"blend": "House"}));
        let none = resolve_source(&mut conn, &by_name, owner, Decimal::ONE).await.unwrap();
        assert!(matches!(none, RoastSource::Unspecified));
    }
}
