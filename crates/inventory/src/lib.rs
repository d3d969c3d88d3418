//! Production material flow between the shop floor and stores.
//!
//! Material requests pull materials out of stores for a production order; material
//! returns send unused or defective material back. Pure domain logic (no IO).

pub mod material_request;
pub mod material_return;

pub use material_request::{
    CreateMaterialRequest, MaterialLine, MaterialRequest, MaterialRequestCommand,
    MaterialRequestCreated, MaterialRequestEvent, MaterialRequestStatus,
    MATERIAL_REQUEST_LIFECYCLE,
};
pub use material_return::{
    CreateMaterialReturn, MaterialReturn, MaterialReturnCommand, MaterialReturnCreated,
    MaterialReturnEvent, MaterialReturnStatus, MATERIAL_RETURN_LIFECYCLE,
};
