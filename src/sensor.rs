use crate::model::{MetricSnapshot, MetricValue};

/// How one realtime metric is presented to consumers.
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    /// `data_name` of the realtime row carrying the value.
    pub response_key: &'static str,
    pub unit: Option<&'static str>,
    pub normalize: Option<fn(&MetricValue) -> MetricValue>,
}

const fn sensor(
    key: &'static str,
    name: &'static str,
    response_key: &'static str,
    unit: Option<&'static str>,
) -> SensorDescription {
    SensorDescription {
        key,
        name,
        response_key,
        unit,
        normalize: None,
    }
}

const CELSIUS: Option<&str> = Some("°C");
const KVA: Option<&str> = Some("kVA");
const KWH: Option<&str> = Some("kWh");
const KW: Option<&str> = Some("kW");
const VOLT: Option<&str> = Some("V");
const AMPERE: Option<&str> = Some("A");
const HERTZ: Option<&str> = Some("Hz");
const VAR: Option<&str> = Some("var");
const PERCENT: Option<&str> = Some("%");

/// The gateway reports "--" when there is no data.
pub fn dash_zeroes(value: &MetricValue) -> MetricValue {
    match value {
        MetricValue::Text(text) if text == "--" => MetricValue::Number(0.0),
        other => other.clone(),
    }
}

/// Values reported in kilo-units, presented in units.
pub fn kilo_to_unit(value: &MetricValue) -> MetricValue {
    value
        .as_f64()
        .map_or_else(|| value.clone(), |n| MetricValue::Number(n * 1000.0))
}

impl SensorDescription {
    /// Presented value; `None` when the key is absent from the snapshot or null.
    pub fn value(&self, snapshot: &MetricSnapshot) -> Option<MetricValue> {
        let reading = snapshot.get(self.response_key)?;
        if reading.value.is_null() {
            return None;
        }
        let value = match self.normalize {
            Some(normalize) => normalize(&reading.value),
            None => reading.value.clone(),
        };
        Some(match value {
            MetricValue::Number(n) => MetricValue::Number((n * 10_000.0).round() / 10_000.0),
            other => other,
        })
    }
}

pub fn find(
    sensors: &'static [SensorDescription],
    response_key: &str,
) -> Option<&'static SensorDescription> {
    sensors.iter().find(|s| s.response_key == response_key)
}

pub static INVERTER_SENSORS: &[SensorDescription] = &[
    sensor(
        "inverter_temperature_internal_air",
        "Internal Air Temperature",
        "I18N_COMMON_AIR_TEM_INSIDE_MACHINE",
        CELSIUS,
    ),
    sensor(
        "inverter_maximum_apparent_power",
        "Maximum Apparent Power",
        "I18N_COMMON_MAXIMUM_APPARENT_POWER_SIWHFGQY",
        KVA,
    ),
    sensor("inverter_status", "Device Status", "I18N_COMMON_DEVICE_STATUS", None),
    // PV
    sensor("pv_energy_day", "Daily PV Yield", "I18N_COMMON_PV_DAYILY_ENERGY_GENERATION", KWH),
    sensor("pv_energy_total", "Total PV Yield", "I18N_COMMON_PV_TOTAL_ENERGY_GENERATION", KWH),
    sensor("pv_voltage_bus", "Bus Voltage", "I18N_COMMON_BUS_VOLTAGE", VOLT),
    sensor(
        "pv_insulation_resistance",
        "Array Insulation Resistance",
        "I18N_COMMON_SQUARE_ARRAY_INSULATION_IMPEDANCE",
        Some("kΩ"),
    ),
    sensor(
        "self_consumption_rate_day",
        "Daily Self-consumption Rate",
        "I18N_CONFIG_KEY_1001188",
        PERCENT,
    ),
    sensor(
        "feed_network_active_power",
        "Total Export Active Power",
        "I18N_COMMON_FEED_NETWORK_TOTAL_ACTIVE_POWER",
        KW,
    ),
    sensor("energy_purchased", "Purchased Power", "I18N_CONFIG_KEY_4060", KW),
    sensor(
        "feed_network_daily",
        "Daily Feed-in Energy",
        "I18N_COMMON_DAILY_FEED_NETWORK_VOLUME",
        KWH,
    ),
    sensor(
        "feed_network_total",
        "Total Feed-in Energy",
        "I18N_COMMON_TOTAL_FEED_NETWORK_VOLUME",
        KWH,
    ),
    sensor(
        "grid_purchased_energy_daily",
        "Daily Purchased Energy",
        "I18N_COMMON_ENERGY_GET_FROM_GRID_DAILY",
        KWH,
    ),
    sensor(
        "grid_purchased_energy_total",
        "Total Purchased Energy",
        "I18N_COMMON_TOTAL_ELECTRIC_GRID_GET_POWER",
        KWH,
    ),
    sensor(
        "pv_feed_network_daily",
        "Daily Feed-in Energy (PV)",
        "I18N_COMMON_DAILY_FEED_NETWORK_PV",
        KWH,
    ),
    sensor(
        "pv_feed_network_total",
        "Total Feed-in Energy (PV)",
        "I18N_COMMON_TOTAL_FEED_NETWORK_PV",
        KWH,
    ),
    sensor(
        "total_load_active_power",
        "Total Load Active Power",
        "I18N_COMMON_LOAD_TOTAL_ACTIVE_POWER",
        KW,
    ),
    sensor(
        "pv_daily_direct_energy_consumption",
        "Daily Load Energy Consumption from PV",
        "I18N_COMMON_DAILY_DIRECT_CONSUMPTION_ELECTRICITY_PV",
        KWH,
    ),
    sensor(
        "pv_total_direct_energy_consumption",
        "Total Load Energy Consumption from PV",
        "I18N_COMMON_TOTAL_DIRECT_POWER_CONSUMPTION_PV",
        KWH,
    ),
    sensor("total_dc_power", "Total DC Power", "I18N_COMMON_TOTAL_DCPOWER", KW),
    sensor("total_active_power", "Total Active Power", "I18N_COMMON_TOTAL_ACTIVE_POWER", KW),
    SensorDescription {
        normalize: Some(kilo_to_unit),
        ..sensor(
            "total_reactive_power",
            "Total Reactive Power",
            "I18N_COMMON_TOTAL_REACTIVE_POWER",
            VAR,
        )
    },
    sensor("total_apparent_power", "Total Apparent Power", "I18N_COMMON_TOTAL_APPARENT_POWER", KVA),
    sensor("power_factor_total", "Total Power Factor", "I18N_COMMON_TOTAL_POWER_FACTOR", None),
    sensor("grid_frequency", "Grid Frequency", "I18N_COMMON_GRID_FREQUENCY", HERTZ),
    sensor("voltage_phase_a", "Phase A Voltage", "I18N_COMMONUA", VOLT),
    sensor("voltage_phase_b", "Phase B Voltage", "I18N_COMMON_UB", VOLT),
    sensor("voltage_phase_c", "Phase C Voltage", "I18N_COMMON_UC", VOLT),
    sensor("current_phase_a", "Phase A Current", "I18N_COMMON_FRAGMENT_RUN_TYPE1", AMPERE),
    sensor("current_phase_b", "Phase B Current", "I18N_COMMON_IB", AMPERE),
    sensor("current_phase_c", "Phase C Current", "I18N_COMMON_IC", AMPERE),
    // Backup
    sensor(
        "backup_current_phase_a",
        "Phase A Backup Current",
        "I18N_COMMON_PHASE_A_BACKUP_CURRENT_QFKYGING",
        AMPERE,
    ),
    sensor(
        "backup_current_phase_b",
        "Phase B Backup Current",
        "I18N_COMMON_PHASE_B_BACKUP_CURRENT_ODXCTVMS",
        AMPERE,
    ),
    sensor(
        "backup_current_phase_c",
        "Phase C Backup Current",
        "I18N_COMMON_PHASE_C_BACKUP_CURRENT_PBSQLZIX",
        AMPERE,
    ),
    SensorDescription {
        normalize: Some(dash_zeroes),
        ..sensor(
            "backup_voltage_phase_a",
            "Phase A Backup Voltage",
            "I18N_COMMON_PHASE_A_BACKUP_VOLTAGE_PEIYFKXE",
            VOLT,
        )
    },
    SensorDescription {
        normalize: Some(dash_zeroes),
        ..sensor(
            "backup_voltage_phase_b",
            "Phase B Backup Voltage",
            "I18N_COMMON_PHASE_B_BACKUP_VOLTAGE_MCDGYUJO",
            VOLT,
        )
    },
    SensorDescription {
        normalize: Some(dash_zeroes),
        ..sensor(
            "backup_voltage_phase_c",
            "Phase C Backup Voltage",
            "I18N_COMMON_PHASE_C_BACKUP_VOLTAGE_SCJZFFCQ",
            VOLT,
        )
    },
    SensorDescription {
        normalize: Some(dash_zeroes),
        ..sensor(
            "backup_frequency",
            "Backup Frequency",
            "I18N_COMMON_BACKUP_FREQUENCY_MPPOWHDF",
            HERTZ,
        )
    },
    sensor(
        "backup_power_phase_a",
        "Phase A Backup Power",
        "I18N_COMMON_PHASE_A_BACKUP_POWER_BRBJDGVB",
        KW,
    ),
    sensor(
        "backup_power_phase_b",
        "Phase B Backup Power",
        "I18N_COMMON_PHASE_B_BACKUP_POWER_OCDHLMZB",
        KW,
    ),
    sensor(
        "backup_power_phase_c",
        "Phase C Backup Power",
        "I18N_COMMON_PHASE_C_BACKUP_POWER_HAMBBGNL",
        KW,
    ),
    sensor(
        "backup_power_total",
        "Total Backup Power",
        "I18N_COMMON_TOTAL_BACKUP_POWER_WLECIVPM",
        KW,
    ),
    // Meter
    sensor(
        "meter_grid_frequency",
        "Meter Grid Freq",
        "I18N_COMMON_METER_GRID_FREQ_AMMAKPKU",
        HERTZ,
    ),
    sensor(
        "meter_reactive_power",
        "Reactive Power Uploaded by Meter",
        "I18N_COMMON_REACTIVE_POWER_UPLOADED_BY_ME_KISYMRKR",
        VAR,
    ),
];

pub static BATTERY_SENSORS: &[SensorDescription] = &[
    sensor("battery_charging_power", "Battery Charging Power", "I18N_CONFIG_KEY_3907", KW),
    sensor("battery_discharging_power", "Battery Discharging Power", "I18N_CONFIG_KEY_3921", KW),
    sensor("battery_voltage", "Battery Voltage", "I18N_COMMON_BATTERY_VOLTAGE", VOLT),
    sensor("battery_current", "Battery Current", "I18N_COMMON_BATTERY_CURRENT", AMPERE),
    sensor(
        "battery_temperature",
        "Battery Temperature",
        "I18N_COMMON_BATTERY_TEMPERATURE",
        CELSIUS,
    ),
    sensor("battery_soc", "Battery Level (SOC)", "I18N_COMMON_BATTERY_SOC", PERCENT),
    sensor("battery_soh", "Battery Health (SOH)", "I18N_COMMON_BATTARY_HEALTH", PERCENT),
    sensor(
        "battery_max_charging_current",
        "Max. Charging Current (BMS)",
        "I18N_COMMON_MAX_CHARGE_CURRENT_BMS",
        AMPERE,
    ),
    sensor(
        "battery_max_discharging_current",
        "Max. Discharging Current (BMS)",
        "I18N_COMMON_MAX_DISCHARGE_CURRENT_BMS",
        AMPERE,
    ),
    sensor(
        "battery_charge_pv_daily",
        "Daily Battery Charging Energy from PV",
        "I18N_COMMON_DAILY_BATTERY_CHARGE_PV",
        KWH,
    ),
    sensor(
        "battery_charge_pv_total",
        "Total Battery Charging Energy from PV",
        "I18N_COMMON_TOTAL_BATTERY_CHARGE_PV",
        KWH,
    ),
    sensor(
        "battery_discharge_daily",
        "Daily Battery Discharging Energy",
        "I18N_COMMON_DAILY_BATTERY_DISCHARGE",
        KWH,
    ),
    sensor(
        "battery_discharge_total",
        "Total Battery Discharging Energy",
        "I18N_COMMON_TOTAL_BATTRY_DISCHARGE",
        KWH,
    ),
    sensor(
        "battery_charge_daily",
        "Daily Battery Charging Energy",
        "I18N_COMMON_DAILY_BATTERY_CHARGE",
        KWH,
    ),
    sensor(
        "battery_charge_total",
        "Total Battery Charging Energy",
        "I18N_COMMON_TOTAL_BATTERY_CHARGE",
        KWH,
    ),
];
