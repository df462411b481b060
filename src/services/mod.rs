pub mod accuweather;
pub mod ecobee;
pub mod ecobee_status;
pub mod nest;
pub mod openweathermap;
pub mod weathergov;
