pub mod sms_activate;

pub use sms_activate::SmsActivateProvider;
