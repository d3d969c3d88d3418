//! Procurement documents: purchase orders, goods receipt notes and vendor returns.
//!
//! Business rules only, implemented as deterministic event-sourced aggregates
//! (no IO, no HTTP, no storage).

pub mod grn;
pub mod order;
pub mod vendor_return;

pub use grn::{
    CreateGrn, Discrepancy, DiscrepancyKind, ExpectedLine, GoodsReceiptNote, GrnCommand,
    GrnCreated, GrnEvent, GrnInspected, GrnLine, GrnStatus, RecordReceivedQuantity,
    GRN_INSPECTED_EVENT, GRN_LIFECYCLE,
};
pub use order::{
    AddLine, CreatePurchaseOrder, NewOrderLine, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderLine, PurchaseOrderStatus, ReceivedLine, RecordReceipt,
    PURCHASE_ORDER_LIFECYCLE,
};
pub use vendor_return::{
    CreateVendorReturn, ReturnReason, ReturnSource, VendorReturn, VendorReturnCommand,
    VendorReturnCreated, VendorReturnEvent, VendorReturnLine, VendorReturnStatus,
    VENDOR_RETURN_LIFECYCLE,
};
