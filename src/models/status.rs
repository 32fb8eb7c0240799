// src/models/status.rs
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Статус заявки на перевозку. Допустимые переходы: в `lifecycle`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    EnumString, Display, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CargoStatus {
    Created,
    Accepted,
    AwaitingPayment,
    Paid,
    AwaitingPlacement,
    PlacedInWarehouse,
    RemovedFromPlacement,
    PickupRequested,
    AssignedToCourier,
    PickedUpByCourier,
    CourierDeliveredToWarehouse,
    InTransit,
    ArrivedDestination,
    Completed,
}

impl Default for CargoStatus {
    fn default() -> Self {
        CargoStatus::Created
    }
}

impl CargoStatus {
    pub fn display_name_ru(&self) -> &'static str {
        match self {
            CargoStatus::Created => "Создана",
            CargoStatus::Accepted => "Принята",
            CargoStatus::AwaitingPayment => "Ожидает оплаты",
            CargoStatus::Paid => "Оплачена",
            CargoStatus::AwaitingPlacement => "Ожидает размещения",
            CargoStatus::PlacedInWarehouse => "Размещена на складе",
            CargoStatus::RemovedFromPlacement => "Снята с размещения",
            CargoStatus::PickupRequested => "Запрошен забор",
            CargoStatus::AssignedToCourier => "Назначен курьер",
            CargoStatus::PickedUpByCourier => "Забрана курьером",
            CargoStatus::CourierDeliveredToWarehouse => "Доставлена курьером на склад",
            CargoStatus::InTransit => "В пути",
            CargoStatus::ArrivedDestination => "Прибыла в пункт назначения",
            CargoStatus::Completed => "Завершена",
        }
    }
}

/// Статус отдельной единицы груза
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    AwaitingPlacement,
    Placed,
    RemovedFromPlacement,
}
