//! Identifiers of the warehouse domain.

use stockledger_core::define_id;

define_id!(WarehouseId, "WarehouseId");
define_id!(LocationId, "LocationId");
define_id!(ProductId, "ProductId");
define_id!(VariantId, "VariantId");
define_id!(LotId, "LotId");
define_id!(SerialId, "SerialId");
define_id!(
    /// Identifier of an immutable ledger entry.
    MoveId,
    "MoveId"
);
define_id!(ReservationId, "ReservationId");
define_id!(OrderId, "OrderId");
define_id!(OrderItemId, "OrderItemId");
define_id!(ReceiptId, "ReceiptId");
define_id!(ReceiptItemId, "ReceiptItemId");
define_id!(PickWaveId, "PickWaveId");
define_id!(PickTaskId, "PickTaskId");
define_id!(ShipmentId, "ShipmentId");
define_id!(PackageId, "PackageId");
define_id!(TransferOrderId, "TransferOrderId");
define_id!(AdjustmentId, "AdjustmentId");
define_id!(AdjustmentItemId, "AdjustmentItemId");
define_id!(CycleCountId, "CycleCountId");
define_id!(CountItemId, "CountItemId");
