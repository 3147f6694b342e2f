use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{Client, CustomRedisError};

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisCall {
    Get(String),
    Set(String, String),
    Del(String),
}

#[derive(Clone, Default)]
pub struct MockRedisClient {
    get_ret: HashMap<String, Result<String, CustomRedisError>>,
    set_ret: HashMap<String, Result<(), CustomRedisError>>,
    del_ret: HashMap<String, Result<(), CustomRedisError>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper method to safely lock the calls mutex
    fn lock_calls(&self) -> MutexGuard<'_, Vec<MockRedisCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get_ret(&mut self, key: &str, ret: Result<String, CustomRedisError>) -> Self {
        self.get_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn set_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        self.set_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn del_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        self.del_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_calls().clone()
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: &str) -> Result<String, CustomRedisError> {
        self.lock_calls().push(MockRedisCall::Get(key.to_string()));
        match self.get_ret.get(key) {
            Some(ret) => ret.clone(),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CustomRedisError> {
        self.lock_calls()
            .push(MockRedisCall::Set(key.to_string(), value.to_string()));
        match self.set_ret.get(key) {
            Some(ret) => ret.clone(),
            None => Ok(()),
        }
    }

    async fn del(&self, key: &str) -> Result<(), CustomRedisError> {
        self.lock_calls().push(MockRedisCall::Del(key.to_string()));
        match self.del_ret.get(key) {
            Some(ret) => ret.clone(),
            None => Ok(()),
        }
    }
}
