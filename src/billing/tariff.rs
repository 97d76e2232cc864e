use super::models::{CostBreakdown, TariffConfig, UsageSnapshot};

/// key: billing-tariff -> usage + tariff to cost breakdown
pub fn price(snapshot: &UsageSnapshot, tariff: &TariffConfig) -> CostBreakdown {
    let chat_overage_units = overage_units(snapshot.chat_sent_count, tariff.chat_free_units);
    let mail_overage_units = overage_units(snapshot.mail_recipient_count, tariff.mail_free_units);
    let chat_overage_cost_cents = chat_overage_units * tariff.chat_overage_unit_cost_cents;
    let mail_overage_cost_cents = mail_overage_units * tariff.mail_overage_unit_cost_cents;

    CostBreakdown {
        chat_overage_units,
        mail_overage_units,
        base_plan_cost_cents: tariff.base_plan_cost_cents,
        chat_overage_cost_cents,
        mail_overage_cost_cents,
        total_cost_cents: tariff.base_plan_cost_cents
            + chat_overage_cost_cents
            + mail_overage_cost_cents,
    }
}

pub fn overage_units(used: i64, free_units: i64) -> i64 {
    used.saturating_sub(free_units.max(0)).max(0)
}
