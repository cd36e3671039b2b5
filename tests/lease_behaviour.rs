//! Behavioural scenarios for the lease lifecycle.

mod lease;
