#![allow(unused_imports, dead_code)]
#![forbid(unsafe_code)]
