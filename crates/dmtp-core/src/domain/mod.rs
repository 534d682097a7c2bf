//! Domain entities for the OpenDMTP client.
//!
//! This module contains pure data types with no infrastructure dependencies:
//! geographic points and the GPS events built from them.
//!
//! # Why keep these separate? (for beginners)
//!
//! A GPS sample is produced by the platform (a location service, a serial
//! NMEA reader, a test fixture) and consumed by several parts of the engine:
//! the GPS modules look at it to detect motion, and the packet encoder turns
//! it into wire bytes.  Keeping the types here, free of any codec or socket
//! code, lets every layer share them without circular dependencies.

/// GPS event record and status codes.
pub mod event;

/// Latitude/longitude point and distance/heading math.
pub mod geo;
