//! idle-worker - run a compute worker only while the machine is idle.
//!
//! Every tick samples active login sessions, decides whether the whole machine
//! has been idle for long enough, and starts or stops a single worker process
//! accordingly.

pub mod config;
pub mod controller;
pub mod domain;
pub mod idle;
pub mod poller;
pub mod sampler;
pub mod session;
pub mod worker;
