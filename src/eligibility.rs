//! Pure derivations of which actions an identity may legally attempt against
//! a record snapshot, and of winner/pot amounts. No I/O, no side effects;
//! callers pass the clock and the live fee rate in.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{
    Address, Prediction, PredictionOption, PredictionStatus, TokenAmount, UnixTime,
};

pub fn is_expired(prediction: &Prediction, now: UnixTime) -> bool {
    now > prediction.expiry_time
}

/// A connected identity other than the creator may join an open, unexpired
/// prediction.
pub fn can_join(prediction: &Prediction, viewer: Option<&Address>, now: UnixTime) -> bool {
    let Some(viewer) = viewer else { return false };
    prediction.status == PredictionStatus::Open
        && !is_expired(prediction, now)
        && *viewer != prediction.creator
}

pub fn can_cancel(prediction: &Prediction, viewer: Option<&Address>) -> bool {
    prediction.status == PredictionStatus::Open && viewer == Some(&prediction.creator)
}

/// The winning participant. Defined only once the record is resolved or
/// claimed; `None` otherwise.
pub fn winner(prediction: &Prediction) -> Option<Address> {
    if !matches!(
        prediction.status,
        PredictionStatus::Resolved | PredictionStatus::Claimed
    ) {
        return None;
    }
    if prediction.creator_choice == prediction.winning_option {
        Some(prediction.creator.clone())
    } else {
        prediction.opponent.clone()
    }
}

pub fn can_claim(prediction: &Prediction, viewer: Option<&Address>) -> bool {
    prediction.status == PredictionStatus::Resolved
        && viewer.is_some()
        && winner(prediction).as_ref() == viewer
}

pub fn can_resolve(prediction: &Prediction, is_admin: bool) -> bool {
    is_admin && prediction.status == PredictionStatus::Matched
}

pub fn can_refund(prediction: &Prediction, is_admin: bool) -> bool {
    can_resolve(prediction, is_admin)
}

/// The side a joining identity must take: always the one the creator did not
/// pick. Joiners get no choice.
pub fn opponent_required_choice(prediction: &Prediction) -> PredictionOption {
    prediction.creator_choice.opposite()
}

/// The stake at play: one side's stake while open, both once matched.
pub fn displayed_pot(prediction: &Prediction) -> TokenAmount {
    if prediction.status == PredictionStatus::Open {
        prediction.bet_amount
    } else {
        // The ledger is the source of the amount; keep this total even for
        // records it should never hand out.
        prediction.bet_amount.saturating_mul(2)
    }
}

/// Pot after the platform fee, truncated so rounding never overstates the
/// payout. `fee_percent` comes from the ledger, not from a constant.
pub fn net_payout(prediction: &Prediction, fee_percent: u64) -> TokenAmount {
    let pot = Decimal::from(displayed_pot(prediction));
    let fee_rate = Decimal::from(fee_percent) / dec!(100);
    let out = (pot - pot * fee_rate).trunc();
    out.to_u64().unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(status: PredictionStatus) -> Prediction {
        Prediction {
            id: 1,
            creator: Address::new("0xc0"),
            opponent: if status == PredictionStatus::Open {
                None
            } else {
                Some(Address::new("0x0b"))
            },
            title: "Title".to_string(),
            description: "Description".to_string(),
            option_a: "Yes".to_string(),
            option_b: "No".to_string(),
            bet_amount: 100_000_000,
            creator_choice: PredictionOption::OptionA,
            opponent_choice: if status == PredictionStatus::Open {
                PredictionOption::None
            } else {
                PredictionOption::OptionB
            },
            status,
            winning_option: match status {
                PredictionStatus::Resolved | PredictionStatus::Claimed => {
                    PredictionOption::OptionA
                }
                _ => PredictionOption::None,
            },
            created_at: 1_000,
            expiry_time: 1_000 + 3_600,
        }
    }

    #[test]
    fn joining_is_for_connected_non_creators_before_expiry() {
        let prediction = record(PredictionStatus::Open);
        let now = 2_000;
        let stranger = Address::new("0x99");
        assert!(can_join(&prediction, Some(&stranger), now));
        assert!(!can_join(&prediction, Some(&prediction.creator.clone()), now));
        assert!(!can_join(&prediction, None, now));
        // Expiry flips the answer regardless of everything else.
        assert!(!can_join(&prediction, Some(&stranger), 1_000 + 3_601));
    }

    #[test]
    fn joiner_takes_the_opposite_side_unconditionally() {
        let mut prediction = record(PredictionStatus::Open);
        prediction.creator_choice = PredictionOption::OptionB;
        assert_eq!(
            opponent_required_choice(&prediction),
            PredictionOption::OptionA
        );
        prediction.creator_choice = PredictionOption::OptionA;
        assert_eq!(
            opponent_required_choice(&prediction),
            PredictionOption::OptionB
        );
    }

    #[test]
    fn winner_is_whoever_chose_the_winning_option() {
        let prediction = record(PredictionStatus::Resolved);
        assert_eq!(winner(&prediction), Some(Address::new("0xc0")));
        assert!(can_claim(&prediction, Some(&Address::new("0xc0"))));
        assert!(!can_claim(&prediction, Some(&Address::new("0x0b"))));

        let mut lost = record(PredictionStatus::Resolved);
        lost.winning_option = PredictionOption::OptionB;
        assert_eq!(winner(&lost), Some(Address::new("0x0b")));

        // Undefined until resolved.
        assert_eq!(winner(&record(PredictionStatus::Matched)), None);
    }

    #[test]
    fn pot_doubles_once_matched() {
        assert_eq!(displayed_pot(&record(PredictionStatus::Open)), 100_000_000);
        for status in [
            PredictionStatus::Matched,
            PredictionStatus::Resolved,
            PredictionStatus::Cancelled,
            PredictionStatus::Claimed,
        ] {
            assert_eq!(displayed_pot(&record(status)), 200_000_000);
        }
        // A hostile amount saturates instead of panicking.
        let mut huge = record(PredictionStatus::Matched);
        huge.bet_amount = u64::MAX - 1;
        assert_eq!(displayed_pot(&huge), u64::MAX);
    }

    #[test]
    fn payout_truncates_after_the_fee() {
        let prediction = record(PredictionStatus::Resolved);
        assert_eq!(net_payout(&prediction, 2), 196_000_000);
        assert_eq!(net_payout(&prediction, 0), 200_000_000);
        let mut odd = record(PredictionStatus::Resolved);
        odd.bet_amount = 33;
        // 66 * 0.98 = 64.68, truncated.
        assert_eq!(net_payout(&odd, 2), 64);
    }

    #[test]
    fn terminal_records_permit_nothing() {
        for status in [PredictionStatus::Cancelled, PredictionStatus::Claimed] {
            let prediction = record(status);
            for viewer in ["0xc0", "0x0b", "0x99"] {
                let viewer = Address::new(viewer);
                assert!(!can_join(&prediction, Some(&viewer), 0));
                assert!(!can_join(&prediction, Some(&viewer), i64::MAX));
                assert!(!can_cancel(&prediction, Some(&viewer)));
                assert!(!can_claim(&prediction, Some(&viewer)));
            }
        }
    }

    #[test]
    fn resolve_and_refund_need_privilege_and_a_match() {
        let matched = record(PredictionStatus::Matched);
        assert!(can_resolve(&matched, true));
        assert!(can_refund(&matched, true));
        assert!(!can_resolve(&matched, false));
        assert!(!can_resolve(&record(PredictionStatus::Open), true));
        assert!(!can_refund(&record(PredictionStatus::Resolved), true));
    }
}
