//! Bargain message composition (Slack Block Kit).

use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::models::BargainCandidate;
use crate::transport::{MessageContent, MessageHandle};

pub const ACCEPT_ACTION_ID: &str = "aceptar_oferta";
pub const REJECT_ACTION_ID: &str = "rechazar_oferta";

/// Renders candidates into chat messages.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    channel_id: String,
}

impl MessageComposer {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
        }
    }

    /// Render a candidate. The buttons carry the message handle once it
    /// is known; before the first post it is empty. An image block sits
    /// between the details and the buttons when `image_url` is set.
    pub fn compose(
        &self,
        candidate: &BargainCandidate,
        handle: Option<&MessageHandle>,
        image_url: Option<&str>,
    ) -> MessageContent {
        let listing = &candidate.listing;
        let bands = &candidate.bands;

        let body = format!(
            ":iphone: *¡Oferta detectada!*\n\
             *Marca:* {}\n\
             *Modelo:* {}\n\
             *Prenda/SKU:* {}\n\
             *Descripción:* {}\n\
             *Sucursal:* {}\n\
             *Precio en sucursal:* ${}\n\
             :dollar: *Margen estimado:* ${}\n\
             :label: *Artículo en rango bajo ({}):* ${} a ${}\n\
             :moneybag: *Rango de precio dominante ({}):* ${} a ${}\n\
             :chart_with_upwards_trend: *Rango alto ({}):* ${} a ${}",
            listing.brand,
            listing.model,
            listing.sku,
            listing.description,
            listing.branch,
            format_money(listing.price),
            format_money(candidate.margin_vs_dominant_min),
            bands.low_count,
            format_money(bands.low_from),
            format_money(bands.low_to),
            bands.dominant_count,
            format_money(candidate.stats.q1),
            format_money(candidate.stats.q3),
            bands.high_count,
            format_money(bands.high_from),
            format_money(bands.high_to),
        );

        let button_value = json!({
            "sku": listing.sku,
            "marca": listing.brand,
            "modelo": listing.model,
            "channel_id": self.channel_id,
            "message_ts": handle.map(|h| h.ts.as_str()).unwrap_or_default(),
        })
        .to_string();

        let mut blocks = vec![json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": body }
        })];
        if let Some(url) = image_url {
            blocks.push(json!({
                "type": "image",
                "image_url": url,
                "alt_text": format!("Imagen de {} {}", listing.brand, listing.model),
            }));
        }
        blocks.push(json!({
            "type": "actions",
            "elements": [
                button("✅ Aceptar oferta", "primary", ACCEPT_ACTION_ID, &button_value),
                button("❌ Rechazar", "danger", REJECT_ACTION_ID, &button_value),
            ]
        }));
        blocks.push(json!({ "type": "divider" }));

        MessageContent {
            text: format!(
                "Oferta: {} {} en {} por ${}",
                listing.brand,
                listing.model,
                listing.branch,
                format_money(listing.price)
            ),
            blocks: Value::Array(blocks),
        }
    }
}

fn button(label: &str, style: &str, action_id: &str, value: &str) -> Value {
    json!({
        "type": "button",
        "text": { "type": "plain_text", "text": label },
        "style": style,
        "action_id": action_id,
        "value": value,
    })
}

/// Whole-unit amount with thousands separators, e.g. `6,599`.
pub fn format_money(amount: Decimal) -> String {
    let rounded = amount.round().abs().trunc().to_string();

    let mut grouped = String::with_capacity(rounded.len() + rounded.len() / 3);
    for (i, ch) in rounded.chars().enumerate() {
        if i > 0 && (rounded.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if amount.round().is_sign_negative() && !amount.round().is_zero() {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
