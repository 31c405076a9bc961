//! Position sizing.
//!
//! All sizing functions return a quantity in base asset units, or 0 when
//! the inputs cannot produce a meaningful size.

/// Fixed notional value per trade
pub fn fixed_notional(notional: f64, price: f64) -> f64 {
    if !(notional.is_finite() && price.is_finite()) || notional <= 0.0 || price <= 0.0 {
        return 0.0;
    }
    notional / price
}

/// Commit `pct` of the balance as margin at `leverage`.
pub fn levered_balance_pct(balance: f64, pct: f64, leverage: f64, price: f64) -> f64 {
    if !(balance.is_finite() && pct.is_finite() && leverage.is_finite()) {
        return 0.0;
    }
    if balance <= 0.0 || pct <= 0.0 || leverage <= 0.0 {
        return 0.0;
    }
    fixed_notional(balance * pct * leverage, price)
}

/// Largest price move, as a fraction of entry, that keeps the account-level
/// change within `account_fraction` at `leverage`.
pub fn account_fraction_to_price_distance(account_fraction: f64, leverage: f64) -> f64 {
    if !(account_fraction.is_finite() && leverage.is_finite()) || leverage <= 0.0 {
        return 0.0;
    }
    (account_fraction / leverage).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_notional() {
        assert_eq!(fixed_notional(100.0, 50.0), 2.0);
        assert_eq!(fixed_notional(100.0, 0.0), 0.0);
        assert_eq!(fixed_notional(f64::NAN, 10.0), 0.0);
    }

    #[test]
    fn test_levered_balance_pct() {
        // 10% of 1000 as margin at 10x = 1000 notional
        assert_eq!(levered_balance_pct(1_000.0, 0.1, 10.0, 500.0), 2.0);
        assert_eq!(levered_balance_pct(-1.0, 0.1, 10.0, 500.0), 0.0);
    }

    #[test]
    fn test_distance_from_account_fraction() {
        assert!((account_fraction_to_price_distance(0.02, 10.0) - 0.002).abs() < 1e-15);
        assert_eq!(account_fraction_to_price_distance(0.02, 0.0), 0.0);
    }
}
