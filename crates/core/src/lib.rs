//! Core of the AI Lab: a virtual water-phenomena experiment for primary school
//! learners, narrated by a hosted tutor model.

pub mod action;
pub mod audio;
pub mod controller;
pub mod gateway;
pub mod lab;
pub mod prompt;
pub mod quiz;
pub mod sound;
pub mod storage;
pub mod transcript;

pub use action::ActionType;
pub use controller::{ControllerError, LabController, LabSnapshot, Outcome};
pub use lab::LabState;
