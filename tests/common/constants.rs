//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test sizing or fixture locations change, update only this file.

// ============================================================================
// Server Lifecycle
// ============================================================================

/// Timeout for the test server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;

/// Poll interval while waiting for readiness
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 25;

/// Per-request timeout for the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Test Usage Locations
// ============================================================================

/// Property ID for "Seaside Apartment"
pub const PROPERTY_1_ID: &str = "property-1";

/// Property ID for "Mountain Cabin"
pub const PROPERTY_2_ID: &str = "property-2";

/// Zone ID for the kitchen
pub const ZONE_KITCHEN_ID: &str = "zone-kitchen";

/// Zone ID for the bathroom
pub const ZONE_BATH_ID: &str = "zone-bath";

/// Step ID for the check-in walkthrough
pub const STEP_CHECKIN_ID: &str = "step-checkin";

/// Step ID for the appliance instructions
pub const STEP_APPLIANCE_ID: &str = "step-appliance";

// ============================================================================
// Sizing
// ============================================================================

pub const MIB: usize = 1024 * 1024;
