use crate::domain::cycle::AjoCycle;
use crate::domain::wallet::Wallet;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    user: u64,
    balance: Decimal,
    currency: &'a str,
}

#[derive(Serialize)]
struct CycleRow {
    group: u64,
    cycle: u32,
    payout_user: u64,
    pool: Decimal,
    paid_out: bool,
}

/// Writes the final engine state as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one `user,balance,currency` row per wallet.
    pub fn write_wallets(&mut self, wallets: impl IntoIterator<Item = Wallet>) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                user: wallet.user.0,
                balance: wallet.balance.value().normalize(),
                currency: &wallet.currency,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes one `group,cycle,payout_user,pool,paid_out` row per cycle.
    pub fn write_cycles(&mut self, cycles: impl IntoIterator<Item = AjoCycle>) -> Result<()> {
        for cycle in cycles {
            self.writer.serialize(CycleRow {
                group: cycle.group.0,
                cycle: cycle.cycle_number,
                payout_user: cycle.payout_user.0,
                pool: cycle.pool_amount.value().normalize(),
                paid_out: cycle.paid_out,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::group::GroupId;
    use crate::domain::money::Amount;
    use crate::domain::user::UserId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_write_wallets() {
        let mut wallet = Wallet::new(UserId(3), "NGN");
        wallet.credit(Amount::new(dec!(150.50)).unwrap(), "Wallet funding").unwrap();

        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_wallets(vec![wallet]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "user,balance,currency\n3,150.5,NGN\n");
    }

    #[test]
    fn test_write_cycles() {
        let mut cycle = AjoCycle::open(GroupId(1), 2, UserId(5));
        cycle.add_contribution(Amount::new(dec!(10)).unwrap()).unwrap();

        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_cycles(vec![cycle]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "group,cycle,payout_user,pool,paid_out\n1,2,5,10,false\n");
    }
}
