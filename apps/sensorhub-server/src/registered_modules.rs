// This file is used to ensure that all module crates are linked and their
// type descriptors registered via inventory.
#![allow(unused_imports)]

use record_store as _;
use sim_sensor as _;
