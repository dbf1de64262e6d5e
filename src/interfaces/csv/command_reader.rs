use crate::domain::group::{Frequency, GroupId};
use crate::domain::ledger::RequestId;
use crate::domain::money::Amount;
use crate::domain::user::UserId;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    KycSubmit,
    KycVerify,
    KycReject,
    Fund,
    Withdraw,
    Create,
    Join,
    Activate,
    Contribute,
    Payout,
}

/// One row of the commands file, as written.
///
/// Columns not used by an operation are left empty. `user` is required by
/// every operation except `payout`.
#[derive(Debug, Deserialize, Clone)]
pub struct CommandRecord {
    pub op: Op,
    pub user: Option<UserId>,
    pub group: Option<GroupId>,
    pub amount: Option<Decimal>,
    pub request: Option<RequestId>,
    pub title: Option<String>,
    pub frequency: Option<Frequency>,
}

/// A validated operation ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    KycSubmit {
        user: UserId,
    },
    KycVerify {
        user: UserId,
    },
    KycReject {
        user: UserId,
    },
    Fund {
        user: UserId,
        amount: Amount,
    },
    Withdraw {
        user: UserId,
        amount: Amount,
    },
    Create {
        owner: UserId,
        title: String,
        amount: Amount,
        frequency: Frequency,
    },
    Join {
        group: GroupId,
        user: UserId,
    },
    Activate {
        group: GroupId,
        user: UserId,
    },
    /// The amount is passed through unchecked so the engine can report
    /// `WrongAmount` for it.
    Contribute {
        request: RequestId,
        group: GroupId,
        user: UserId,
        amount: Decimal,
    },
    /// Closes the group's open cycle.
    Payout {
        group: GroupId,
    },
}

fn required<T>(value: Option<T>, column: &str, op: Op) -> Result<T> {
    value.ok_or_else(|| LedgerError::Validation(format!("{op:?} requires a '{column}' value")))
}

impl TryFrom<CommandRecord> for Command {
    type Error = LedgerError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let CommandRecord {
            op,
            user,
            group,
            amount,
            request,
            title,
            frequency,
        } = record;

        let require_user = || required(user, "user", op);
        let command = match op {
            Op::KycSubmit => Command::KycSubmit { user: require_user()? },
            Op::KycVerify => Command::KycVerify { user: require_user()? },
            Op::KycReject => Command::KycReject { user: require_user()? },
            Op::Fund => Command::Fund {
                user: require_user()?,
                amount: Amount::new(required(amount, "amount", op)?)?,
            },
            Op::Withdraw => Command::Withdraw {
                user: require_user()?,
                amount: Amount::new(required(amount, "amount", op)?)?,
            },
            Op::Create => Command::Create {
                owner: require_user()?,
                title: required(title, "title", op)?,
                amount: Amount::new(required(amount, "amount", op)?)?,
                frequency: frequency.unwrap_or(Frequency::Weekly),
            },
            Op::Join => Command::Join {
                group: required(group, "group", op)?,
                user: require_user()?,
            },
            Op::Activate => Command::Activate {
                group: required(group, "group", op)?,
                user: require_user()?,
            },
            Op::Contribute => Command::Contribute {
                request: required(request, "request", op)?,
                group: required(group, "group", op)?,
                user: require_user()?,
                amount: required(amount, "amount", op)?,
            },
            Op::Payout => Command::Payout {
                group: required(group, "group", op)?,
            },
        };
        Ok(command)
    }
}

/// Reads engine commands from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths, so
/// trailing empty columns may be omitted.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads, deserializes and validates each row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(LedgerError::from).and_then(Command::try_from))
    }
}
