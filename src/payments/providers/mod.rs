pub mod etegram;
pub mod flutterwave;
pub mod paystack;
pub mod stripe;

pub use etegram::EtegramProvider;
pub use flutterwave::FlutterwaveProvider;
pub use paystack::PaystackProvider;
pub use stripe::StripeProvider;
