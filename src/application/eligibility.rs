use crate::domain::address::Address;
use crate::domain::ports::EligibilityAuthority;
use std::collections::HashSet;

/// Demo policy: an account may grant eligibility to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfService;

impl EligibilityAuthority for SelfService {
    fn may_grant(&self, submitter: Address, account: Address) -> bool {
        submitter == account
    }
}

/// Only the listed privileged submitters may grant eligibility, to anyone.
#[derive(Debug, Default, Clone)]
pub struct PrivilegedSubmitters {
    admins: HashSet<Address>,
}

impl PrivilegedSubmitters {
    pub fn new(admins: impl IntoIterator<Item = Address>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl EligibilityAuthority for PrivilegedSubmitters {
    fn may_grant(&self, submitter: Address, _account: Address) -> bool {
        self.admins.contains(&submitter)
    }
}
