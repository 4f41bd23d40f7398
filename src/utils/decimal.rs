//! Tick and lot rounding for prices and sizes.

use rust_decimal::Decimal;

/// Round down onto the tick grid. Keeps a passive bid from creeping upward.
pub fn floor_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).floor() * tick_size
}

/// Round up onto the tick grid. Keeps a passive ask from creeping downward.
pub fn ceil_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_directional_tick_rounding() {
        assert_eq!(floor_to_tick(dec!(100.07), dec!(0.1)), dec!(100.0));
        assert_eq!(ceil_to_tick(dec!(100.01), dec!(0.1)), dec!(100.1));
        // Values already on the grid are unchanged
        assert_eq!(floor_to_tick(dec!(99.9), dec!(0.1)), dec!(99.9));
        assert_eq!(ceil_to_tick(dec!(99.9), dec!(0.1)), dec!(99.9));
    }

    #[test]
    fn test_zero_tick_is_passthrough() {
        assert_eq!(ceil_to_tick(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
        assert_eq!(floor_to_tick(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
    }
}
