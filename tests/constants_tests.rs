// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use camera_preview::constants::{
    DEFAULT_REFRESH_RATE_HZ, MAX_OUTSTANDING_REQUESTS, MAX_REFRESH_RATE_HZ, PRESENT_POLL_INTERVAL,
    PRESENT_TIMEOUT, SAMPLE_QUEUE_CAPACITY,
};

#[test]
fn test_queue_and_request_limits() {
    assert_eq!(SAMPLE_QUEUE_CAPACITY, 5);
    assert_eq!(MAX_OUTSTANDING_REQUESTS, 3);
    // Every outstanding request must fit into the queue
    assert!(
        MAX_OUTSTANDING_REQUESTS <= SAMPLE_QUEUE_CAPACITY,
        "Outstanding requests should never overrun an empty queue"
    );
}

#[test]
fn test_present_wait_slices() {
    assert!(
        PRESENT_POLL_INTERVAL < PRESENT_TIMEOUT,
        "The present wait should re-check the stop flag several times"
    );
}

#[test]
fn test_default_refresh_rate_is_valid() {
    assert!(DEFAULT_REFRESH_RATE_HZ > 0);
    assert!(DEFAULT_REFRESH_RATE_HZ <= MAX_REFRESH_RATE_HZ);
}
