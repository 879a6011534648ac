use std::collections::HashMap;

use serde::Serialize;

use crate::fields::{Field, FieldGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingRole {
    /// Summed into the field.
    Leaf,
    /// A sub-account rolling up into a parent total line.
    Component,
    /// The parent total line itself; only used when no component is present.
    ParentTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineItemMapping {
    pub code: &'static str,
    pub group: FieldGroup,
    pub field: Field,
    pub role: MappingRole,
}

const fn leaf(code: &'static str, group: FieldGroup, field: Field) -> LineItemMapping {
    LineItemMapping { code, group, field, role: MappingRole::Leaf }
}

const fn component(code: &'static str, group: FieldGroup, field: Field) -> LineItemMapping {
    LineItemMapping { code, group, field, role: MappingRole::Component }
}

const fn parent(code: &'static str, group: FieldGroup, field: Field) -> LineItemMapping {
    LineItemMapping { code, group, field, role: MappingRole::ParentTotal }
}

use Field as F;
use FieldGroup as G;

pub const LINE_ITEM_MAPPINGS: &[LineItemMapping] = &[
    leaf("40000", G::Income, F::HdResearchIncome),
    leaf("40010", G::Income, F::HdResearchIncome),
    leaf("40100", G::Income, F::PdResearchIncome),
    leaf("41000", G::Income, F::PatientServicesIncome),
    leaf("42000", G::Income, F::LabIncome),
    leaf("43000", G::Income, F::PharmacyIncome),
    leaf("44000", G::Income, F::ConsultingIncome),
    leaf("45000", G::Income, F::GrantIncome),
    leaf("49000", G::Income, F::MiscIncome),
    leaf("51000", G::CostOfGoodsSold, F::CogsMedicalSupplies),
    leaf("52000", G::CostOfGoodsSold, F::CogsLabFees),
    leaf("53000", G::CostOfGoodsSold, F::CogsMedicalBilling),
    leaf("53100", G::CostOfGoodsSold, F::CogsMedicalBilling),
    leaf("54000", G::CostOfGoodsSold, F::CogsPharmacy),
    leaf("55000", G::CostOfGoodsSold, F::CogsContractPhysicians),
    leaf("56000", G::CostOfGoodsSold, F::CogsSubjectPayments),
    leaf("59000", G::CostOfGoodsSold, F::CogsOther),
    leaf("66010", G::Payroll, F::PayrollPhysicianWages),
    leaf("66015", G::Payroll, F::PayrollPhysicianWages),
    leaf("66011", G::Payroll, F::PayrollPhysicianTaxes),
    leaf("66012", G::Payroll, F::PayrollPhysicianBenefits),
    leaf("66020", G::Payroll, F::PayrollClinicalWages),
    leaf("66021", G::Payroll, F::PayrollClinicalTaxes),
    leaf("66022", G::Payroll, F::PayrollClinicalBenefits),
    leaf("66030", G::Payroll, F::PayrollSharedWages),
    leaf("66035", G::Payroll, F::PayrollSharedWages),
    leaf("66040", G::Payroll, F::PayrollSharedTaxes),
    leaf("66050", G::Payroll, F::PayrollSharedBenefits),
    leaf("66060", G::Payroll, F::PayrollAdminWages),
    leaf("66061", G::Payroll, F::PayrollAdminTaxes),
    leaf("66062", G::Payroll, F::PayrollAdminBenefits),
    leaf("66070", G::Payroll, F::PayrollProcessingFees),
    leaf("66080", G::Payroll, F::PayrollBonuses),
    leaf("66090", G::Payroll, F::PayrollWorkersComp),
    leaf("61100", G::Professional, F::AccountingFees),
    leaf("61200", G::Professional, F::LegalFees),
    leaf("61300", G::Professional, F::ConsultingFees),
    leaf("61400", G::Professional, F::BillingServiceFees),
    leaf("62100", G::Administrative, F::OfficeSupplies),
    leaf("62200", G::Administrative, F::PostageShipping),
    leaf("62300", G::Administrative, F::BankCharges),
    leaf("62310", G::Administrative, F::BankCharges),
    leaf("62400", G::Administrative, F::DuesSubscriptions),
    leaf("62500", G::Administrative, F::LicensesPermits),
    leaf("62600", G::Administrative, F::InsuranceGeneral),
    leaf("62700", G::Administrative, F::InsuranceMalpractice),
    leaf("62800", G::Administrative, F::Travel),
    leaf("62900", G::Administrative, F::MealsEntertainment),
    leaf("63100", G::Clinical, F::MedicalSuppliesExpense),
    leaf("63200", G::Clinical, F::LabSupplies),
    leaf("63300", G::Clinical, F::EquipmentRental),
    leaf("63400", G::Clinical, F::EquipmentMaintenance),
    leaf("63500", G::Clinical, F::WasteDisposal),
    leaf("63600", G::Clinical, F::ContinuingEducation),
    leaf("64100", G::Marketing, F::Advertising),
    leaf("64200", G::Marketing, F::PatientRecruitment),
    leaf("64210", G::Marketing, F::PatientRecruitment),
    leaf("64300", G::Marketing, F::MarketingMaterials),
    leaf("67100", G::Facilities, F::RentExpense),
    leaf("67110", G::Facilities, F::RentExpense),
    parent("67200", G::Facilities, F::Utilities),
    component("67210", G::Facilities, F::Utilities),
    component("67220", G::Facilities, F::Utilities),
    component("67230", G::Facilities, F::Utilities),
    leaf("67300", G::Facilities, F::RepairsMaintenance),
    // Shares its code with the automobile parent line; needs a section to resolve.
    leaf("65200", G::Facilities, F::Janitorial),
    leaf("67400", G::Facilities, F::Security),
    leaf("67500", G::Facilities, F::PropertyTax),
    leaf("68100", G::Technology, F::SoftwareSubscriptions),
    leaf("68110", G::Technology, F::SoftwareSubscriptions),
    leaf("68200", G::Technology, F::ItSupport),
    leaf("68300", G::Technology, F::TelephoneInternet),
    leaf("68400", G::Technology, F::ComputerEquipment),
    parent("65200", G::Automobile, F::AutomobileExpense),
    component("65210", G::Automobile, F::AutomobileExpense),
    component("65220", G::Automobile, F::AutomobileExpense),
    component("65230", G::Automobile, F::AutomobileExpense),
    component("65240", G::Automobile, F::AutomobileExpense),
    component("65250", G::Automobile, F::AutomobileExpense),
    leaf("69000", G::Miscellaneous, F::MiscExpense),
    leaf("70100", G::OtherIncome, F::InterestIncome),
    leaf("80100", G::OtherExpense, F::DepreciationExpense),
    leaf("80110", G::OtherExpense, F::DepreciationExpense),
    leaf("80200", G::OtherExpense, F::ManagementFeePaid),
    leaf("80300", G::OtherExpense, F::InterestExpense),
    leaf("80400", G::OtherExpense, F::CorporateAdminFee),
    leaf("80900", G::OtherExpense, F::OtherExpenses),
    leaf("80910", G::OtherExpense, F::OtherExpenses),
];

/// Outcome of resolving one raw account code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Mapped(LineItemMapping),
    /// The code maps in several sections and the line carried no usable section.
    Ambiguous(Vec<FieldGroup>),
    Unmapped,
}

/// Code index over a mapping table.
#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: Vec<LineItemMapping>,
    by_code: HashMap<&'static str, Vec<usize>>,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new(LINE_ITEM_MAPPINGS)
    }
}

impl MappingTable {
    pub fn new(entries: &[LineItemMapping]) -> Self {
        let entries = entries.to_vec();
        let mut by_code: HashMap<&'static str, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_code.entry(entry.code).or_default().push(idx);
        }
        Self { entries, by_code }
    }

    /// Resolve `code`, using `section` only when the code alone is ambiguous.
    pub fn lookup(&self, code: &str, section: Option<FieldGroup>) -> Lookup {
        let Some(indices) = self.by_code.get(code.trim()) else {
            return Lookup::Unmapped;
        };

        if let [only] = indices.as_slice() {
            return Lookup::Mapped(self.entries[*only]);
        }

        if let Some(section) = section {
            if let Some(idx) = indices.iter().find(|i| self.entries[**i].group == section) {
                return Lookup::Mapped(self.entries[*idx]);
            }
        }

        let mut groups: Vec<FieldGroup> = indices.iter().map(|i| self.entries[*i].group).collect();
        groups.sort();
        groups.dedup();
        Lookup::Ambiguous(groups)
    }

    /// Codes used by more than one section, sorted.
    pub fn ambiguous_codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<&'static str> = self
            .by_code
            .iter()
            .filter(|(_, idx)| idx.len() > 1)
            .map(|(code, _)| *code)
            .collect();
        codes.sort_unstable();
        codes
    }

    pub fn codes_for(&self, field: Field) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.code)
            .collect()
    }
}
