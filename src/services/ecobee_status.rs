use std::collections::HashMap;
use std::str::FromStr;

const EQUIPMENT_COUNT: usize = 15;

/// Equipment an Ecobee thermostat reports in its `equipmentStatus` summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Equipment {
    HeatPump,
    HeatPump2,
    HeatPump3,
    CompCool1,
    CompCool2,
    AuxHeat1,
    AuxHeat2,
    AuxHeat3,
    Fan,
    Humidifier,
    Dehumidifier,
    Ventilator,
    Economizer,
    CompHotWater,
    AuxHotWater,
}

impl Equipment {
    pub const ALL: [Equipment; EQUIPMENT_COUNT] = [
        Equipment::HeatPump,
        Equipment::HeatPump2,
        Equipment::HeatPump3,
        Equipment::CompCool1,
        Equipment::CompCool2,
        Equipment::AuxHeat1,
        Equipment::AuxHeat2,
        Equipment::AuxHeat3,
        Equipment::Fan,
        Equipment::Humidifier,
        Equipment::Dehumidifier,
        Equipment::Ventilator,
        Equipment::Economizer,
        Equipment::CompHotWater,
        Equipment::AuxHotWater,
    ];

    /// Field name, identical to the vendor's mode name.
    pub fn as_str(self) -> &'static str {
        match self {
            Equipment::HeatPump => "heatPump",
            Equipment::HeatPump2 => "heatPump2",
            Equipment::HeatPump3 => "heatPump3",
            Equipment::CompCool1 => "compCool1",
            Equipment::CompCool2 => "compCool2",
            Equipment::AuxHeat1 => "auxHeat1",
            Equipment::AuxHeat2 => "auxHeat2",
            Equipment::AuxHeat3 => "auxHeat3",
            Equipment::Fan => "fan",
            Equipment::Humidifier => "humidifier",
            Equipment::Dehumidifier => "dehumidifier",
            Equipment::Ventilator => "ventilator",
            Equipment::Economizer => "economizer",
            Equipment::CompHotWater => "compHotWater",
            Equipment::AuxHotWater => "auxHotWater",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Equipment {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Equipment::ALL
            .into_iter()
            .find(|equipment| equipment.as_str() == value)
            .ok_or(())
    }
}

/// Running state of every known piece of equipment for one thermostat.
/// Anything not mentioned in the summary is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EquipmentStatus {
    running: [bool; EQUIPMENT_COUNT],
}

impl EquipmentStatus {
    pub fn set_running(&mut self, equipment: Equipment) {
        self.running[equipment.index()] = true;
    }

    pub fn is_running(&self, equipment: Equipment) -> bool {
        self.running[equipment.index()]
    }

    /// Every indicator as a `(field name, 0|1)` pair, in vocabulary order.
    pub fn indicators(&self) -> impl Iterator<Item = (&'static str, i64)> + '_ {
        Equipment::ALL
            .into_iter()
            .map(move |equipment| (equipment.as_str(), i64::from(self.is_running(equipment))))
    }
}

/// Joins the thermostat identifiers from the device list with the summary
/// status list (`"<identifier>:<mode>,<mode>,..."`).
///
/// Every identifier gets an entry, all indicators off by default. Entries for
/// unknown identifiers, strings without a colon and unknown mode names are
/// ignored.
pub fn correlate_equipment<'a, I>(
    identifiers: I,
    status_list: &[String],
) -> HashMap<String, EquipmentStatus>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut statuses: HashMap<String, EquipmentStatus> = identifiers
        .into_iter()
        .map(|id| (id.to_string(), EquipmentStatus::default()))
        .collect();

    for entry in status_list {
        let Some((identifier, modes)) = entry.split_once(':') else {
            continue;
        };
        let Some(status) = statuses.get_mut(identifier.trim()) else {
            continue;
        };
        for mode in modes.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            if let Ok(equipment) = mode.parse::<Equipment>() {
                status.set_running(equipment);
            }
        }
    }

    statuses
}
