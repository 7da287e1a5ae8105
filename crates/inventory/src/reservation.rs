//! Reservation aggregate: a hold on available stock for one order line.
//!
//! The aggregate decides *what* is held, consumed or released; the ledger turns
//! the resulting [`HoldDelta`]s and pick moves into projection changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::quantity::ensure_positive;
use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError};
use stockledger_events::Event;

use crate::allocation::AllocationLine;
use crate::identity::{StockKey, StockSelector};
use crate::ids::{OrderId, OrderItemId, ReservationId, WarehouseId};
use crate::movement::{MoveType, StockMove};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    #[default]
    Active,
    Fulfilled,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

/// One allocated row of a reservation and how much of it has been picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub key: StockKey,
    pub qty: Decimal,
    pub consumed: Decimal,
}

impl ReservedLine {
    pub fn outstanding(&self) -> Decimal {
        self.qty - self.consumed
    }
}

/// Change of reserved quantity on one row, attributed to one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldDelta {
    pub reservation_id: ReservationId,
    pub key: StockKey,
    pub delta: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reservation {
    id: ReservationId,
    company_id: Option<CompanyId>,
    order_id: OrderId,
    order_item_id: OrderItemId,
    warehouse_id: WarehouseId,
    selector: StockSelector,
    qty: Decimal,
    lines: Vec<ReservedLine>,
    status: ReservationStatus,
    version: u64,
    created: bool,
}

impl Reservation {
    pub fn empty(id: ReservationId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn order_item_id(&self) -> OrderItemId {
        self.order_item_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn selector(&self) -> StockSelector {
        self.selector
    }

    pub fn qty(&self) -> Decimal {
        self.qty
    }

    pub fn lines(&self) -> &[ReservedLine] {
        &self.lines
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.created && self.status == ReservationStatus::Active
    }

    /// Reserved but not yet picked.
    pub fn outstanding(&self) -> Decimal {
        self.lines.iter().map(ReservedLine::outstanding).sum()
    }

    pub fn consumed(&self) -> Decimal {
        self.lines.iter().map(|l| l.consumed).sum()
    }

    pub fn outstanding_lines(&self) -> Vec<AllocationLine> {
        self.lines
            .iter()
            .filter(|l| l.outstanding() > Decimal::ZERO)
            .map(|l| AllocationLine {
                key: l.key,
                qty: l.outstanding(),
            })
            .collect()
    }
}

impl AggregateRoot for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservation {
    pub company_id: CompanyId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub warehouse_id: WarehouseId,
    pub selector: StockSelector,
    pub qty: Decimal,
    pub lines: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Pick moves drawn against the reservation.
///
/// With `require_complete` the moves must cover everything outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeReservation {
    pub company_id: CompanyId,
    pub moves: Vec<StockMove>,
    pub require_complete: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub company_id: CompanyId,
    pub occurred_at: DateTime<Utc>,
}

/// Hand back the outstanding part of one allocated row, shrinking the
/// reservation. Capped at what the row still has outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseLine {
    pub company_id: CompanyId,
    pub key: StockKey,
    pub qty: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationCommand {
    Create(CreateReservation),
    Consume(ConsumeReservation),
    Release(ReleaseReservation),
    ReleaseLine(ReleaseLine),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCreated {
    pub company_id: CompanyId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub warehouse_id: WarehouseId,
    pub selector: StockSelector,
    pub qty: Decimal,
    pub lines: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConsumed {
    pub company_id: CompanyId,
    pub reservation_id: ReservationId,
    pub moves: Vec<StockMove>,
    /// Quantity consumed per allocated row.
    pub consumed: Vec<AllocationLine>,
    pub fulfilled: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub company_id: CompanyId,
    pub reservation_id: ReservationId,
    /// Outstanding quantity handed back per row.
    pub released: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLineReleased {
    pub company_id: CompanyId,
    pub reservation_id: ReservationId,
    pub released: AllocationLine,
    /// `Fulfilled` once nothing is outstanding and something was picked,
    /// `Cancelled` once nothing is outstanding and nothing was picked.
    pub status: ReservationStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    Created(ReservationCreated),
    Consumed(ReservationConsumed),
    Released(ReservationReleased),
    LineReleased(ReservationLineReleased),
}

impl ReservationEvent {
    /// Reserved-quantity changes this event implies on projection rows.
    pub fn hold_deltas(&self) -> Vec<HoldDelta> {
        let (reservation_id, lines, sign) = match self {
            ReservationEvent::Created(e) => (e.reservation_id, &e.lines[..], Decimal::ONE),
            ReservationEvent::Consumed(e) => (e.reservation_id, &e.consumed[..], Decimal::NEGATIVE_ONE),
            ReservationEvent::Released(e) => (e.reservation_id, &e.released[..], Decimal::NEGATIVE_ONE),
            ReservationEvent::LineReleased(e) => (
                e.reservation_id,
                std::slice::from_ref(&e.released),
                Decimal::NEGATIVE_ONE,
            ),
        };
        lines
            .iter()
            .map(|l| HoldDelta {
                reservation_id,
                key: l.key,
                delta: l.qty * sign,
            })
            .collect()
    }

    /// Ledger moves carried by this event.
    pub fn moves(&self) -> &[StockMove] {
        match self {
            ReservationEvent::Consumed(e) => &e.moves,
            ReservationEvent::Created(_)
            | ReservationEvent::Released(_)
            | ReservationEvent::LineReleased(_) => &[],
        }
    }
}

impl Event for ReservationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReservationEvent::Created(_) => "inventory.reservation.created",
            ReservationEvent::Consumed(_) => "inventory.reservation.consumed",
            ReservationEvent::Released(_) => "inventory.reservation.released",
            ReservationEvent::LineReleased(_) => "inventory.reservation.line_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReservationEvent::Created(e) => e.occurred_at,
            ReservationEvent::Consumed(e) => e.occurred_at,
            ReservationEvent::Released(e) => e.occurred_at,
            ReservationEvent::LineReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Reservation {
    type Command = ReservationCommand;
    type Event = ReservationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReservationEvent::Created(e) => {
                self.id = e.reservation_id;
                self.company_id = Some(e.company_id);
                self.order_id = e.order_id;
                self.order_item_id = e.order_item_id;
                self.warehouse_id = e.warehouse_id;
                self.selector = e.selector;
                self.qty = e.qty;
                self.lines = e
                    .lines
                    .iter()
                    .map(|l| ReservedLine {
                        key: l.key,
                        qty: l.qty,
                        consumed: Decimal::ZERO,
                    })
                    .collect();
                self.status = ReservationStatus::Active;
                self.created = true;
            }
            ReservationEvent::Consumed(e) => {
                for c in &e.consumed {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.key == c.key) {
                        line.consumed += c.qty;
                    }
                }
                if e.fulfilled {
                    self.status = ReservationStatus::Fulfilled;
                }
            }
            ReservationEvent::Released(_) => {
                self.status = ReservationStatus::Cancelled;
            }
            ReservationEvent::LineReleased(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.key == e.released.key) {
                    line.qty -= e.released.qty;
                }
                self.qty -= e.released.qty;
                self.status = e.status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReservationCommand::Create(cmd) => self.handle_create(cmd),
            ReservationCommand::Consume(cmd) => self.handle_consume(cmd),
            ReservationCommand::Release(cmd) => self.handle_release(cmd),
            ReservationCommand::ReleaseLine(cmd) => self.handle_release_line(cmd),
        }
    }
}

impl Reservation {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("reservation {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateReservation) -> Result<Vec<ReservationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "reservation {} already exists",
                cmd.reservation_id
            )));
        }
        ensure_positive(cmd.qty, "reservation quantity")?;
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("reservation needs at least one line"));
        }

        let mut seen = std::collections::BTreeSet::new();
        for line in &cmd.lines {
            ensure_positive(line.qty, "reserved line quantity")?;
            if !cmd.selector.matches(&line.key) {
                return Err(DomainError::validation(
                    "reserved row does not match the requested product",
                ));
            }
            if !seen.insert(line.key) {
                return Err(DomainError::validation("duplicate reserved row"));
            }
        }
        let total: Decimal = cmd.lines.iter().map(|l| l.qty).sum();
        if total != cmd.qty {
            return Err(DomainError::validation(format!(
                "allocated {total} does not match requested {}",
                cmd.qty
            )));
        }

        Ok(vec![ReservationEvent::Created(ReservationCreated {
            company_id: cmd.company_id,
            reservation_id: cmd.reservation_id,
            order_id: cmd.order_id,
            order_item_id: cmd.order_item_id,
            warehouse_id: cmd.warehouse_id,
            selector: cmd.selector,
            qty: cmd.qty,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(&self, cmd: &ConsumeReservation) -> Result<Vec<ReservationEvent>, DomainError> {
        self.ensure_company(cmd.company_id)?;
        if self.status != ReservationStatus::Active {
            return Err(DomainError::conflict(format!(
                "reservation {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        if cmd.moves.is_empty() {
            return Err(DomainError::validation("no pick moves supplied"));
        }

        let mut per_row: BTreeMap<StockKey, Decimal> = BTreeMap::new();
        for m in &cmd.moves {
            if m.kind != MoveType::Pick {
                return Err(DomainError::validation(format!(
                    "reservations are consumed by pick moves, got {}",
                    m.kind.as_str()
                )));
            }
            if m.company_id != cmd.company_id || m.warehouse_id != self.warehouse_id {
                return Err(DomainError::validation(
                    "pick move belongs to another company or warehouse",
                ));
            }
            let key = m
                .source_key()
                .ok_or_else(|| DomainError::validation("pick move has no source location"))?;
            *per_row.entry(key).or_default() += m.qty;
        }

        let mut consumed = Vec::with_capacity(per_row.len());
        for (key, qty) in per_row {
            let line = self
                .lines
                .iter()
                .find(|l| l.key == key)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "location {} is not allocated to reservation {}",
                        key.location_id, self.id
                    ))
                })?;
            if qty > line.outstanding() {
                return Err(DomainError::validation(format!(
                    "picking {qty} exceeds outstanding {} at location {}",
                    line.outstanding(),
                    key.location_id
                )));
            }
            consumed.push(AllocationLine { key, qty });
        }

        let total: Decimal = consumed.iter().map(|l| l.qty).sum();
        let outstanding = self.outstanding();
        if cmd.require_complete && total != outstanding {
            return Err(DomainError::validation(format!(
                "pick moves cover {total} of outstanding {outstanding}"
            )));
        }

        Ok(vec![ReservationEvent::Consumed(ReservationConsumed {
            company_id: cmd.company_id,
            reservation_id: self.id,
            moves: cmd.moves.clone(),
            consumed,
            fulfilled: total == outstanding,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseReservation) -> Result<Vec<ReservationEvent>, DomainError> {
        self.ensure_company(cmd.company_id)?;
        // Releasing a fulfilled or cancelled reservation is a no-op.
        if self.status != ReservationStatus::Active {
            return Ok(vec![]);
        }
        Ok(vec![ReservationEvent::Released(ReservationReleased {
            company_id: cmd.company_id,
            reservation_id: self.id,
            released: self.outstanding_lines(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release_line(&self, cmd: &ReleaseLine) -> Result<Vec<ReservationEvent>, DomainError> {
        self.ensure_company(cmd.company_id)?;
        ensure_positive(cmd.qty, "released quantity")?;
        if self.status != ReservationStatus::Active {
            return Ok(vec![]);
        }
        let line = self.lines.iter().find(|l| l.key == cmd.key).ok_or_else(|| {
            DomainError::validation(format!(
                "location {} is not allocated to reservation {}",
                cmd.key.location_id, self.id
            ))
        })?;
        let qty = cmd.qty.min(line.outstanding());
        if qty <= Decimal::ZERO {
            return Ok(vec![]);
        }

        let status = if self.outstanding() > qty {
            ReservationStatus::Active
        } else if self.consumed() > Decimal::ZERO {
            ReservationStatus::Fulfilled
        } else {
            ReservationStatus::Cancelled
        };
        Ok(vec![ReservationEvent::LineReleased(ReservationLineReleased {
            company_id: cmd.company_id,
            reservation_id: self.id,
            released: AllocationLine { key: cmd.key, qty },
            status,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ProductRef, Tracking};
    use crate::ids::{LocationId, ProductId};
    use rust_decimal_macros::dec;
    use stockledger_events::execute;

    struct Fixture {
        company_id: CompanyId,
        warehouse_id: WarehouseId,
        product: ProductRef,
        a: StockKey,
        b: StockKey,
    }

    fn fixture() -> Fixture {
        let product = ProductRef::product(ProductId::new());
        Fixture {
            company_id: CompanyId::new(),
            warehouse_id: WarehouseId::new(),
            product,
            a: StockKey::new(LocationId::new(), product, Tracking::Untracked),
            b: StockKey::new(LocationId::new(), product, Tracking::Untracked),
        }
    }

    fn created(f: &Fixture) -> Reservation {
        let id = ReservationId::new();
        let mut r = Reservation::empty(id);
        execute(
            &mut r,
            &ReservationCommand::Create(CreateReservation {
                company_id: f.company_id,
                reservation_id: id,
                order_id: OrderId::new(),
                order_item_id: OrderItemId::new(),
                warehouse_id: f.warehouse_id,
                selector: StockSelector::any(f.product),
                qty: dec!(6),
                lines: vec![
                    AllocationLine { key: f.a, qty: dec!(4) },
                    AllocationLine { key: f.b, qty: dec!(2) },
                ],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        r
    }

    fn pick(f: &Fixture, key: StockKey, qty: Decimal) -> StockMove {
        StockMove::new(
            f.company_id,
            MoveType::Pick,
            f.warehouse_id,
            f.product,
            key.tracking,
            qty,
            Utc::now(),
        )
        .from_location(key.location_id)
    }

    fn consume(f: &Fixture, moves: Vec<StockMove>, require_complete: bool) -> ReservationCommand {
        ReservationCommand::Consume(ConsumeReservation {
            company_id: f.company_id,
            moves,
            require_complete,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_holds_every_allocated_row() {
        let f = fixture();
        let r = created(&f);
        assert_eq!(r.status(), ReservationStatus::Active);
        assert_eq!(r.outstanding(), dec!(6));
        assert_eq!(r.version(), 1);
    }

    #[test]
    fn allocation_must_match_requested_quantity() {
        let f = fixture();
        let id = ReservationId::new();
        let err = Reservation::empty(id)
            .handle(&ReservationCommand::Create(CreateReservation {
                company_id: f.company_id,
                reservation_id: id,
                order_id: OrderId::new(),
                order_item_id: OrderItemId::new(),
                warehouse_id: f.warehouse_id,
                selector: StockSelector::any(f.product),
                qty: dec!(5),
                lines: vec![AllocationLine { key: f.a, qty: dec!(4) }],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn partial_consume_keeps_reservation_active() {
        let f = fixture();
        let mut r = created(&f);
        let events = execute(&mut r, &consume(&f, vec![pick(&f, f.a, dec!(4))], false)).unwrap();
        assert_eq!(
            events[0].hold_deltas(),
            vec![HoldDelta { reservation_id: *r.id(), key: f.a, delta: dec!(-4) }]
        );
        assert_eq!(r.status(), ReservationStatus::Active);
        assert_eq!(r.outstanding(), dec!(2));

        execute(&mut r, &consume(&f, vec![pick(&f, f.b, dec!(2))], false)).unwrap();
        assert_eq!(r.status(), ReservationStatus::Fulfilled);
    }

    #[test]
    fn fulfill_requires_the_full_outstanding_quantity() {
        let f = fixture();
        let r = created(&f);
        let err = r
            .handle(&consume(&f, vec![pick(&f, f.a, dec!(4))], true))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let events = r
            .handle(&consume(&f, vec![pick(&f, f.a, dec!(4)), pick(&f, f.b, dec!(2))], true))
            .unwrap();
        assert_eq!(events[0].moves().len(), 2);
    }

    #[test]
    fn picks_must_come_from_allocated_rows_within_outstanding() {
        let f = fixture();
        let r = created(&f);
        let stranger = StockKey::new(LocationId::new(), f.product, Tracking::Untracked);
        assert!(r.handle(&consume(&f, vec![pick(&f, stranger, dec!(1))], false)).is_err());
        assert!(r.handle(&consume(&f, vec![pick(&f, f.b, dec!(3))], false)).is_err());
    }

    #[test]
    fn release_hands_back_only_the_outstanding_part() {
        let f = fixture();
        let mut r = created(&f);
        execute(&mut r, &consume(&f, vec![pick(&f, f.a, dec!(3))], false)).unwrap();

        let release = ReservationCommand::Release(ReleaseReservation {
            company_id: f.company_id,
            occurred_at: Utc::now(),
        });
        let events = execute(&mut r, &release).unwrap();
        let total: Decimal = events[0].hold_deltas().iter().map(|d| d.delta).sum();
        assert_eq!(total, dec!(-3));
        assert_eq!(r.status(), ReservationStatus::Cancelled);

        // second release is a no-op
        assert!(execute(&mut r, &release).unwrap().is_empty());
    }

    fn release_line(f: &Fixture, key: StockKey, qty: Decimal) -> ReservationCommand {
        ReservationCommand::ReleaseLine(ReleaseLine {
            company_id: f.company_id,
            key,
            qty,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn releasing_the_last_open_line_after_a_pick_fulfills() {
        let f = fixture();
        let mut r = created(&f);
        execute(&mut r, &consume(&f, vec![pick(&f, f.a, dec!(4))], false)).unwrap();

        let events = execute(&mut r, &release_line(&f, f.b, dec!(2))).unwrap();
        assert_eq!(
            events[0].hold_deltas(),
            vec![HoldDelta {
                reservation_id: *r.id(),
                key: f.b,
                delta: dec!(-2),
            }]
        );
        assert_eq!(r.status(), ReservationStatus::Fulfilled);
        assert_eq!(r.qty(), dec!(4));
        assert_eq!(r.outstanding(), Decimal::ZERO);
    }

    #[test]
    fn releasing_every_line_before_a_pick_cancels() {
        let f = fixture();
        let mut r = created(&f);

        execute(&mut r, &release_line(&f, f.a, dec!(4))).unwrap();
        assert_eq!(r.status(), ReservationStatus::Active);
        assert_eq!(r.outstanding_lines(), vec![AllocationLine { key: f.b, qty: dec!(2) }]);

        // the remaining line can still be picked in full
        execute(&mut r, &consume(&f, vec![pick(&f, f.b, dec!(2))], false)).unwrap();
        assert_eq!(r.status(), ReservationStatus::Fulfilled);

        let mut other = created(&f);
        execute(&mut other, &release_line(&f, f.a, dec!(4))).unwrap();
        execute(&mut other, &release_line(&f, f.b, dec!(2))).unwrap();
        assert_eq!(other.status(), ReservationStatus::Cancelled);
    }

    #[test]
    fn line_release_is_capped_at_the_outstanding_part() {
        let f = fixture();
        let mut r = created(&f);
        execute(&mut r, &consume(&f, vec![pick(&f, f.a, dec!(1))], false)).unwrap();

        let events = execute(&mut r, &release_line(&f, f.a, dec!(4))).unwrap();
        assert_eq!(events[0].hold_deltas()[0].delta, dec!(-3));
        assert!(execute(&mut r, &release_line(&f, f.a, dec!(3))).unwrap().is_empty());
        assert_eq!(r.status(), ReservationStatus::Active);
    }

    #[test]
    fn consume_after_cancel_is_a_conflict() {
        let f = fixture();
        let mut r = created(&f);
        execute(
            &mut r,
            &ReservationCommand::Release(ReleaseReservation {
                company_id: f.company_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        let err = r
            .handle(&consume(&f, vec![pick(&f, f.a, dec!(1))], false))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
