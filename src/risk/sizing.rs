// =============================================================================
// Position sizing — per-account quantity/notional computation (§4.3)
// =============================================================================

use crate::account::{Account, AccountPolicy};
use crate::signal::Signal;
use crate::types::SizingMode;

const HALF_KELLY: f64 = 0.5;
const KELLY_FRACTION_CAP: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized { quantity: f64, notional_usd: f64 },
    Skip { reason: String },
}

/// Statistics the KELLY mode needs that live outside the Account row.
#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    pub account_balance: f64,
    pub win_rate: f64,
    pub avg_win_loss_ratio: f64,
    pub exchange_min_notional: f64,
    pub lot_step: f64,
}

pub fn size_position(signal: &Signal, account: &Account, inputs: &SizingInputs) -> SizingOutcome {
    let policy = &account.policy;

    let notional = match policy.sizing_mode {
        SizingMode::Fixed => policy.sizing_value.min(policy.max_position_size_usd),
        SizingMode::PercentBalance => {
            (inputs.account_balance * policy.sizing_value).min(policy.max_position_size_usd)
        }
        SizingMode::Kelly => kelly_notional(policy, inputs),
    };

    if notional <= 0.0 {
        return SizingOutcome::Skip { reason: "sizing produced non-positive notional".into() };
    }

    let raw_quantity = notional * policy.leverage as f64 / signal.entry;
    let quantity = round_down_to_step(raw_quantity, inputs.lot_step);

    if quantity * signal.entry < inputs.exchange_min_notional {
        return SizingOutcome::Skip { reason: "below min notional".into() };
    }

    let risk_usd = notional * (signal.entry - signal.stop_loss).abs() / signal.entry;
    if risk_usd > inputs.account_balance * policy.max_risk_per_trade {
        return SizingOutcome::Skip { reason: "stop distance exceeds max risk per trade".into() };
    }

    SizingOutcome::Sized { quantity, notional_usd: notional }
}

fn kelly_notional(policy: &AccountPolicy, inputs: &SizingInputs) -> f64 {
    let edge = inputs.win_rate - (1.0 - inputs.win_rate) / inputs.avg_win_loss_ratio.max(f64::EPSILON);
    let f_star = edge.clamp(0.0, KELLY_FRACTION_CAP);
    (inputs.account_balance * f_star * HALF_KELLY).min(policy.max_position_size_usd)
}

fn round_down_to_step(quantity: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return quantity;
    }
    (quantity / step).floor() * step
}
