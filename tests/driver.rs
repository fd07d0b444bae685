//! End-to-end driver runs
//!
//! Every run happens below a temporary root with a scripted control plane,
//! real shell scripts and stand-ins for kubectl and ssh. No cluster or
//! network access is needed:
//!
//! ```bash
//! cargo test --test driver
//! ```

mod driver_tests;
