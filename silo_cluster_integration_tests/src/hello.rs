// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The hello service used by every scenario

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use silo::concurrency::{sleep, Duration};
use silo::{Addressable, CallErr, Category, Identity};
use silo_cluster::service_contract;

/// The well-known identity gateways host the hello service under, so clients
/// in other processes can find it without exchanging ids
pub const HELLO_SERVICE: Identity = Identity::new(0x6865_6c6c_6f, Category::Service);

#[service_contract(name = "demo.Hello")]
pub trait Hello {
    async fn say(&self, name: String, greeting: String) -> Result<String, CallErr>;

    #[one_way]
    async fn ping(&self, tag: u64) -> Result<(), CallErr>;

    async fn pings(&self) -> Result<u64, CallErr>;

    #[timeout_ms(500)]
    async fn slow(&self, delay_ms: u64) -> Result<u64, CallErr>;
}

#[derive(Default)]
pub struct HelloService {
    pings: AtomicU64,
    tags: Mutex<Vec<u64>>,
}

impl HelloService {
    pub fn ping_count(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn tags(&self) -> Vec<u64> {
        self.tags
            .lock()
            .map(|tags| tags.clone())
            .unwrap_or_default()
    }
}

impl Addressable for HelloService {}

#[async_trait::async_trait]
impl Hello for HelloService {
    async fn say(&self, name: String, greeting: String) -> Result<String, CallErr> {
        log::info!("Saying '{greeting}' to {name}");
        Ok(format!("{greeting}, {name}!"))
    }

    async fn ping(&self, tag: u64) -> Result<(), CallErr> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut tags) = self.tags.lock() {
            tags.push(tag);
        }
        log::debug!("Ping {tag}");
        Ok(())
    }

    async fn pings(&self) -> Result<u64, CallErr> {
        Ok(self.ping_count())
    }

    async fn slow(&self, delay_ms: u64) -> Result<u64, CallErr> {
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(delay_ms)
    }
}
