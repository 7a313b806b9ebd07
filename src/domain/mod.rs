pub mod building;
pub mod template;

pub use building::BuildingParams;
pub use template::{
    ElectricTariffParams, ReoptParams, ScenarioTemplate, SchedulesType, StorageParams,
};
