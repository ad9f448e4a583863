//! Webhook classifier.
//!
//! Turns an arbitrary provider payload into a typed [`ProviderEvent`]. The
//! provider omits its `event_type` field on some delivery paths, so the
//! classifier falls back to inspecting the payload shape. Must stay pure and
//! deterministic: identical input always yields identical output, which is
//! what makes replayed deliveries testable.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::domain::entities::addon::AddonDefinition;
use crate::domain::entities::provider_event::{
    AddonMatchRule, DetectedAddonPurchase, EventAddon, EventInvoice, EventLineItem,
    PaymentEventData, PaymentEventKind, ProviderEvent, SubscriptionEventData,
    SubscriptionEventKind, UnclassifiedEvent,
};

/// Generic markers that flag an invoice line item as an add-on when the
/// provider omits an explicit item type.
static ADDON_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["addon", "add-on", "add on", "credit pack", "extra messages"]);

/// Lookup tables over the add-on catalog, prebuilt so classification stays a
/// pure function of its arguments.
#[derive(Debug, Default)]
pub struct AddonCatalogIndex {
    by_code: HashMap<String, String>,
    /// price_cents -> codes sharing that price, sorted for determinism.
    by_price: HashMap<i64, Vec<String>>,
    /// lowercase add-on name -> code.
    by_name: Vec<(String, String)>,
}

impl AddonCatalogIndex {
    pub fn new(definitions: &[AddonDefinition]) -> Self {
        let mut by_code = HashMap::new();
        let mut by_price: HashMap<i64, Vec<String>> = HashMap::new();
        let mut by_name = Vec::new();

        for def in definitions {
            by_code.insert(def.code.clone(), def.name.clone());
            by_price
                .entry(def.price_cents as i64)
                .or_default()
                .push(def.code.clone());
            by_name.push((def.name.to_lowercase(), def.code.clone()));
        }
        for codes in by_price.values_mut() {
            codes.sort();
        }
        by_name.sort();

        Self {
            by_code,
            by_price,
            by_name,
        }
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    fn code_for_name_fragment(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.by_name
            .iter()
            .find(|(name, _)| text.contains(name.as_str()))
            .map(|(_, code)| code.as_str())
    }

    fn codes_for_price(&self, price_cents: i64) -> Option<&[String]> {
        self.by_price.get(&price_cents).map(Vec::as_slice)
    }
}

/// Classify a raw webhook payload.
pub fn classify(payload: &Value, catalog: &AddonCatalogIndex) -> ProviderEvent {
    let event_type = payload["event_type"].as_str();

    if let Some(event_type) = event_type
        && let Some(event) = classify_by_event_type(event_type, payload, catalog)
    {
        return event;
    }

    // No recognizable event type: infer from shape. A subscription block
    // outranks a payment block.
    if let Some(subscription) = subscription_object(payload) {
        let kind = match subscription["status"].as_str() {
            Some("live") | Some("active") => SubscriptionEventKind::Activated,
            Some("cancelled") | Some("canceled") => SubscriptionEventKind::Cancelled,
            _ => SubscriptionEventKind::Updated,
        };
        if let Some(data) = parse_subscription(subscription, kind) {
            return ProviderEvent::Subscription(data);
        }
    }

    if let Some(payment) = payment_object(payload) {
        if let Some(data) = parse_payment(payment, None, catalog) {
            return ProviderEvent::Payment(data);
        }
    }

    ProviderEvent::Unclassified(UnclassifiedEvent {
        event_type: event_type.map(str::to_string),
    })
}

fn classify_by_event_type(
    event_type: &str,
    payload: &Value,
    catalog: &AddonCatalogIndex,
) -> Option<ProviderEvent> {
    let subscription_kind = match event_type {
        "subscription_created"
        | "subscription_activation"
        | "subscription_renewed"
        | "subscription_upgraded"
        | "subscription_reactivated" => Some(SubscriptionEventKind::Activated),
        "subscription_cancelled" | "subscription_expired" => Some(SubscriptionEventKind::Cancelled),
        "subscription_updated" | "subscription_downgraded" | "subscription_autorenew_changed" => {
            Some(SubscriptionEventKind::Updated)
        }
        _ => None,
    };
    if let Some(kind) = subscription_kind {
        let subscription = subscription_object(payload)?;
        return parse_subscription(subscription, kind).map(ProviderEvent::Subscription);
    }

    let payment_kind = match event_type {
        "payment_thankyou" | "payment_success" => Some(PaymentEventKind::Succeeded),
        "payment_declined" | "payment_failure" | "payment_failed" => Some(PaymentEventKind::Failed),
        _ => None,
    };
    if let Some(kind) = payment_kind {
        let payment = payment_object(payload)?;
        return parse_payment(payment, Some(kind), catalog).map(ProviderEvent::Payment);
    }

    None
}

fn subscription_object(payload: &Value) -> Option<&Value> {
    let nested = &payload["data"]["subscription"];
    if nested.is_object() {
        return Some(nested);
    }
    let top = &payload["subscription"];
    top.is_object().then_some(top)
}

fn payment_object(payload: &Value) -> Option<&Value> {
    for candidate in [
        &payload["data"]["payment"],
        &payload["payment"],
        &payload["data"]["invoice"],
        &payload["invoice"],
    ] {
        if candidate.is_object() {
            return Some(candidate);
        }
    }
    None
}

fn parse_subscription(
    subscription: &Value,
    kind: SubscriptionEventKind,
) -> Option<SubscriptionEventData> {
    let provider_subscription_id = subscription["subscription_id"]
        .as_str()
        .filter(|s| !s.is_empty())?
        .to_string();

    let status = subscription["status"].as_str().map(str::to_string);

    let auto_renew = subscription["auto_renew"]
        .as_bool()
        .or_else(|| match status.as_deref() {
            Some("non_renewing") => Some(false),
            _ => None,
        });

    let addons = subscription["addons"]
        .as_array()
        .map(|addons| {
            addons
                .iter()
                .filter_map(|addon| {
                    let code = addon["addon_code"].as_str()?.to_string();
                    Some(EventAddon {
                        addon_code: code,
                        quantity: addon["quantity"].as_i64().unwrap_or(1),
                        provider_instance_id: addon["addon_instance_id"]
                            .as_str()
                            .map(str::to_string),
                        name: addon["name"].as_str().map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SubscriptionEventData {
        kind,
        provider_subscription_id,
        status,
        plan_code: subscription["plan"]["plan_code"].as_str().map(str::to_string),
        amount_cents: amount_to_cents(&subscription["amount"]),
        currency: subscription["currency_code"].as_str().map(str::to_string),
        provider_customer_id: subscription["customer"]["customer_id"]
            .as_str()
            .map(str::to_string),
        customer_email: subscription["customer"]["email"].as_str().map(str::to_string),
        current_term_start: parse_event_time(&subscription["current_term_starts_at"])
            .or_else(|| parse_event_time(&subscription["start_date"]))
            .or_else(|| parse_event_time(&subscription["created_time"])),
        current_term_end: parse_event_time(&subscription["current_term_ends_at"]),
        next_billing_at: parse_event_time(&subscription["next_billing_at"]),
        auto_renew,
        addons,
    })
}

fn parse_payment(
    payment: &Value,
    kind: Option<PaymentEventKind>,
    catalog: &AddonCatalogIndex,
) -> Option<PaymentEventData> {
    let kind = kind.or_else(|| match payment["status"].as_str() {
        Some("success") | Some("paid") => Some(PaymentEventKind::Succeeded),
        Some("failure") | Some("failed") | Some("declined") => Some(PaymentEventKind::Failed),
        _ => None,
    })?;

    let invoices = payment["invoices"]
        .as_array()
        .map(|invoices| invoices.iter().map(parse_invoice).collect::<Vec<_>>())
        .unwrap_or_else(|| {
            // Some delivery paths embed a single invoice directly.
            if payment["invoice_id"].is_string() || payment["transaction_type"].is_string() {
                vec![parse_invoice(payment)]
            } else {
                Vec::new()
            }
        });

    let detected_addons = detect_addon_purchases(&invoices, catalog);

    Some(PaymentEventData {
        kind,
        provider_customer_id: payment["customer_id"]
            .as_str()
            .or_else(|| payment["customer"]["customer_id"].as_str())
            .map(str::to_string),
        customer_email: payment["email"]
            .as_str()
            .or_else(|| payment["customer"]["email"].as_str())
            .map(str::to_string),
        invoices,
        detected_addons,
    })
}

fn parse_invoice(invoice: &Value) -> EventInvoice {
    let subscription_ids = invoice["subscription_ids"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let line_items = invoice["invoice_items"]
        .as_array()
        .or_else(|| invoice["line_items"].as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| EventLineItem {
                    code: item["code"]
                        .as_str()
                        .or_else(|| item["addon_code"].as_str())
                        .map(str::to_string),
                    description: item["description"]
                        .as_str()
                        .or_else(|| item["name"].as_str())
                        .map(str::to_string),
                    item_type: item["item_type"]
                        .as_str()
                        .or_else(|| item["category"].as_str())
                        .map(str::to_string),
                    price_cents: amount_to_cents(&item["price"]),
                    quantity: item["quantity"].as_i64().unwrap_or(1),
                })
                .collect()
        })
        .unwrap_or_default();

    EventInvoice {
        invoice_id: invoice["invoice_id"].as_str().map(str::to_string),
        transaction_type: invoice["transaction_type"].as_str().map(str::to_string),
        subscription_ids,
        line_items,
    }
}

/// Add-on detection over upgrade-type invoices, in priority order: explicit
/// item type with a known code, keyword match against catalog names, then
/// catalog price match. Price matching is ambiguous when two add-ons share a
/// price; the first code in sorted order wins and the collision is logged for
/// manual review.
fn detect_addon_purchases(
    invoices: &[EventInvoice],
    catalog: &AddonCatalogIndex,
) -> Vec<DetectedAddonPurchase> {
    let mut detected = Vec::new();

    for invoice in invoices {
        if invoice.transaction_type.as_deref() != Some("upgrade") {
            continue;
        }
        for item in &invoice.line_items {
            if let Some(purchase) = match_line_item(item, catalog) {
                detected.push(purchase);
            }
        }
    }

    detected
}

fn match_line_item(
    item: &EventLineItem,
    catalog: &AddonCatalogIndex,
) -> Option<DetectedAddonPurchase> {
    // Explicit item type plus a recognized code.
    if let Some(item_type) = item.item_type.as_deref()
        && item_type.to_lowercase().contains("addon")
        && let Some(code) = item.code.as_deref()
        && catalog.contains_code(code)
    {
        return Some(DetectedAddonPurchase {
            addon_code: code.to_string(),
            quantity: item.quantity.max(1),
            matched_by: AddonMatchRule::ItemType,
        });
    }

    // Keyword match: the description names a catalog add-on, or carries a
    // generic add-on marker alongside a known code.
    if let Some(description) = item.description.as_deref() {
        if let Some(code) = catalog.code_for_name_fragment(description) {
            return Some(DetectedAddonPurchase {
                addon_code: code.to_string(),
                quantity: item.quantity.max(1),
                matched_by: AddonMatchRule::Keyword,
            });
        }
        let lowered = description.to_lowercase();
        if ADDON_KEYWORDS.iter().any(|kw| lowered.contains(kw))
            && let Some(code) = item.code.as_deref()
            && catalog.contains_code(code)
        {
            return Some(DetectedAddonPurchase {
                addon_code: code.to_string(),
                quantity: item.quantity.max(1),
                matched_by: AddonMatchRule::Keyword,
            });
        }
    }

    // Last resort: the line price matches a catalog add-on price.
    if let Some(price) = item.price_cents
        && let Some(codes) = catalog.codes_for_price(price)
        && let Some(first) = codes.first()
    {
        if codes.len() > 1 {
            tracing::warn!(
                price_cents = price,
                candidates = ?codes,
                "Ambiguous add-on price match; attributing to first candidate, review manually"
            );
        }
        return Some(DetectedAddonPurchase {
            addon_code: first.clone(),
            quantity: item.quantity.max(1),
            matched_by: AddonMatchRule::Price,
        });
    }

    None
}

/// Parse the provider's assorted timestamp encodings: unix seconds, RFC 3339,
/// offset-less datetimes, or bare dates.
pub fn parse_event_time(value: &Value) -> Option<NaiveDateTime> {
    if let Some(secs) = value.as_i64() {
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    parse_time_str(value.as_str()?)
}

/// String form of the same parser, shared with the provider REST adapter
/// (the REST API and the webhooks use the same encodings).
pub fn parse_time_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn amount_to_cents(value: &Value) -> Option<i64> {
    if let Some(f) = value.as_f64() {
        return Some((f * 100.0).round() as i64);
    }
    value.as_str()?.parse::<f64>().ok().map(|f| (f * 100.0).round() as i64)
}
