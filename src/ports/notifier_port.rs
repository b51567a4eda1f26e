//! Outbound notification port trait.

use crate::domain::error::IntratraderError;

pub trait NotifierPort {
    fn notify(&self, message: &str) -> Result<(), IntratraderError>;
}
