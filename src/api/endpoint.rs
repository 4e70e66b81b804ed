pub type Service = str;

pub const CONNECT: &Service = "connect";
pub const DEVICE_LIST: &Service = "devicelist";
pub const REAL: &Service = "real";
pub const REAL_BATTERY: &Service = "real_battery";

pub type Path = str;

pub const ABOUT: &Path = "/about/list";
pub const WEBSOCKET: &Path = "/ws/home/overview";
