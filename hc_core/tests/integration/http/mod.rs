mod retry;
#[cfg(feature = "reqwest-transport")]
mod transport_smoke;
