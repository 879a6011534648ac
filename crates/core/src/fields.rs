//! Canonical schema of a monthly clinic P&L.
//!
//! Every leaf currency field belongs to exactly one [`FieldGroup`] (the section
//! of the P&L it is reported under) and through it to one [`FieldCategory`]
//! that decides which total it feeds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Income,
    CostOfGoodsSold,
    OperatingExpense,
    OtherIncome,
    OtherExpense,
}

/// P&L section. Account codes are only unique within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Income,
    CostOfGoodsSold,
    Payroll,
    Professional,
    Administrative,
    Clinical,
    Marketing,
    Facilities,
    Technology,
    Automobile,
    Miscellaneous,
    OtherIncome,
    OtherExpense,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 13] = [
        FieldGroup::Income,
        FieldGroup::CostOfGoodsSold,
        FieldGroup::Payroll,
        FieldGroup::Professional,
        FieldGroup::Administrative,
        FieldGroup::Clinical,
        FieldGroup::Marketing,
        FieldGroup::Facilities,
        FieldGroup::Technology,
        FieldGroup::Automobile,
        FieldGroup::Miscellaneous,
        FieldGroup::OtherIncome,
        FieldGroup::OtherExpense,
    ];

    pub fn category(self) -> FieldCategory {
        match self {
            FieldGroup::Income => FieldCategory::Income,
            FieldGroup::CostOfGoodsSold => FieldCategory::CostOfGoodsSold,
            FieldGroup::OtherIncome => FieldCategory::OtherIncome,
            FieldGroup::OtherExpense => FieldCategory::OtherExpense,
            _ => FieldCategory::OperatingExpense,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FieldGroup::Income => "income",
            FieldGroup::CostOfGoodsSold => "cost_of_goods_sold",
            FieldGroup::Payroll => "payroll",
            FieldGroup::Professional => "professional",
            FieldGroup::Administrative => "administrative",
            FieldGroup::Clinical => "clinical",
            FieldGroup::Marketing => "marketing",
            FieldGroup::Facilities => "facilities",
            FieldGroup::Technology => "technology",
            FieldGroup::Automobile => "automobile",
            FieldGroup::Miscellaneous => "miscellaneous",
            FieldGroup::OtherIncome => "other_income",
            FieldGroup::OtherExpense => "other_expense",
        }
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the section headings spreadsheets actually use ("Cost of Goods Sold",
/// "COGS", "Auto", "Other Expense", ...) as well as the snake_case names.
impl FromStr for FieldGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let group = match norm.as_str() {
            "income" | "revenue" | "ordinaryincome" => FieldGroup::Income,
            "costofgoodssold" | "cogs" | "costofsales" => FieldGroup::CostOfGoodsSold,
            "payroll" | "payrollexpenses" | "wages" => FieldGroup::Payroll,
            "professional" | "professionalfees" => FieldGroup::Professional,
            "administrative" | "admin" | "generaladministrative" | "generalandadministrative" => {
                FieldGroup::Administrative
            }
            "clinical" | "clinicalexpenses" => FieldGroup::Clinical,
            "marketing" | "advertising" | "marketingadvertising" => FieldGroup::Marketing,
            "facilities" | "facility" | "occupancy" => FieldGroup::Facilities,
            "technology" | "it" | "informationtechnology" => FieldGroup::Technology,
            "automobile" | "auto" | "automobileexpense" | "vehicle" => FieldGroup::Automobile,
            "miscellaneous" | "misc" | "other" => FieldGroup::Miscellaneous,
            "otherincome" => FieldGroup::OtherIncome,
            "otherexpense" | "otherexpenses" => FieldGroup::OtherExpense,
            _ => return Err(format!("Unknown section: '{}'", s.trim())),
        };
        Ok(group)
    }
}

macro_rules! leaf_fields {
    ($( $variant:ident => $name:literal, $label:literal, $group:ident; )+) => {
        /// A leaf currency field of [`crate::FinancialRecord`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum Field {
            $( #[serde(rename = $name)] $variant, )+
        }

        impl Field {
            pub const ALL: &'static [Field] = &[ $( Field::$variant, )+ ];

            /// camelCase schema name, as persisted in snapshots.
            pub fn name(self) -> &'static str {
                match self { $( Field::$variant => $name, )+ }
            }

            pub fn label(self) -> &'static str {
                match self { $( Field::$variant => $label, )+ }
            }

            pub fn group(self) -> FieldGroup {
                match self { $( Field::$variant => FieldGroup::$group, )+ }
            }
        }
    };
}

leaf_fields! {
    HdResearchIncome => "hdResearchIncome", "HD Research Income", Income;
    PdResearchIncome => "pdResearchIncome", "PD Research Income", Income;
    PatientServicesIncome => "patientServicesIncome", "Patient Services Income", Income;
    LabIncome => "labIncome", "Laboratory Income", Income;
    PharmacyIncome => "pharmacyIncome", "Pharmacy Income", Income;
    ConsultingIncome => "consultingIncome", "Consulting Income", Income;
    GrantIncome => "grantIncome", "Grant Income", Income;
    MiscIncome => "miscIncome", "Miscellaneous Income", Income;

    CogsMedicalBilling => "cogsMedicalBilling", "Medical Billing", CostOfGoodsSold;
    CogsMedicalSupplies => "cogsMedicalSupplies", "Medical Supplies (COGS)", CostOfGoodsSold;
    CogsLabFees => "cogsLabFees", "Outside Lab Fees", CostOfGoodsSold;
    CogsPharmacy => "cogsPharmacy", "Pharmacy Purchases", CostOfGoodsSold;
    CogsContractPhysicians => "cogsContractPhysicians", "Contract Physicians", CostOfGoodsSold;
    CogsSubjectPayments => "cogsSubjectPayments", "Study Subject Payments", CostOfGoodsSold;
    CogsOther => "cogsOther", "Other Cost of Goods Sold", CostOfGoodsSold;

    PayrollPhysicianWages => "payrollPhysicianWages", "Physician Wages", Payroll;
    PayrollPhysicianTaxes => "payrollPhysicianTaxes", "Physician Payroll Taxes", Payroll;
    PayrollPhysicianBenefits => "payrollPhysicianBenefits", "Physician Benefits", Payroll;
    PayrollClinicalWages => "payrollClinicalWages", "Clinical Staff Wages", Payroll;
    PayrollClinicalTaxes => "payrollClinicalTaxes", "Clinical Staff Payroll Taxes", Payroll;
    PayrollClinicalBenefits => "payrollClinicalBenefits", "Clinical Staff Benefits", Payroll;
    PayrollSharedWages => "payrollSharedWages", "Shared Services Wages", Payroll;
    PayrollSharedTaxes => "payrollSharedTaxes", "Shared Services Payroll Taxes", Payroll;
    PayrollSharedBenefits => "payrollSharedBenefits", "Shared Services Benefits", Payroll;
    PayrollAdminWages => "payrollAdminWages", "Administrative Wages", Payroll;
    PayrollAdminTaxes => "payrollAdminTaxes", "Administrative Payroll Taxes", Payroll;
    PayrollAdminBenefits => "payrollAdminBenefits", "Administrative Benefits", Payroll;
    PayrollProcessingFees => "payrollProcessingFees", "Payroll Processing Fees", Payroll;
    PayrollBonuses => "payrollBonuses", "Bonuses", Payroll;
    PayrollWorkersComp => "payrollWorkersComp", "Workers Compensation", Payroll;

    AccountingFees => "accountingFees", "Accounting Fees", Professional;
    LegalFees => "legalFees", "Legal Fees", Professional;
    ConsultingFees => "consultingFees", "Consulting Fees", Professional;
    BillingServiceFees => "billingServiceFees", "Billing Service Fees", Professional;

    OfficeSupplies => "officeSupplies", "Office Supplies", Administrative;
    PostageShipping => "postageShipping", "Postage & Shipping", Administrative;
    BankCharges => "bankCharges", "Bank Charges", Administrative;
    DuesSubscriptions => "duesSubscriptions", "Dues & Subscriptions", Administrative;
    LicensesPermits => "licensesPermits", "Licenses & Permits", Administrative;
    InsuranceGeneral => "insuranceGeneral", "General Liability Insurance", Administrative;
    InsuranceMalpractice => "insuranceMalpractice", "Malpractice Insurance", Administrative;
    Travel => "travel", "Travel", Administrative;
    MealsEntertainment => "mealsEntertainment", "Meals & Entertainment", Administrative;

    MedicalSuppliesExpense => "medicalSuppliesExpense", "Medical Supplies", Clinical;
    LabSupplies => "labSupplies", "Lab Supplies", Clinical;
    EquipmentRental => "equipmentRental", "Equipment Rental", Clinical;
    EquipmentMaintenance => "equipmentMaintenance", "Equipment Maintenance", Clinical;
    WasteDisposal => "wasteDisposal", "Medical Waste Disposal", Clinical;
    ContinuingEducation => "continuingEducation", "Continuing Education", Clinical;

    Advertising => "advertising", "Advertising", Marketing;
    PatientRecruitment => "patientRecruitment", "Patient Recruitment", Marketing;
    MarketingMaterials => "marketingMaterials", "Marketing Materials", Marketing;

    RentExpense => "rentExpense", "Rent", Facilities;
    Utilities => "utilities", "Utilities", Facilities;
    RepairsMaintenance => "repairsMaintenance", "Repairs & Maintenance", Facilities;
    Janitorial => "janitorial", "Janitorial", Facilities;
    Security => "security", "Security", Facilities;
    PropertyTax => "propertyTax", "Property Tax", Facilities;

    SoftwareSubscriptions => "softwareSubscriptions", "Software Subscriptions", Technology;
    ItSupport => "itSupport", "IT Support", Technology;
    TelephoneInternet => "telephoneInternet", "Telephone & Internet", Technology;
    ComputerEquipment => "computerEquipment", "Computer Equipment", Technology;

    AutomobileExpense => "automobileExpense", "Automobile Expense", Automobile;

    MiscExpense => "miscExpense", "Miscellaneous Expense", Miscellaneous;

    InterestIncome => "interestIncome", "Interest Income", OtherIncome;

    DepreciationExpense => "depreciationExpense", "Depreciation Expense", OtherExpense;
    ManagementFeePaid => "managementFeePaid", "Management Fee Paid", OtherExpense;
    InterestExpense => "interestExpense", "Interest Expense", OtherExpense;
    CorporateAdminFee => "corporateAdminFee", "Corporate Admin Fee", OtherExpense;
    OtherExpenses => "otherExpenses", "Other Expenses", OtherExpense;
}

impl Field {
    pub fn category(self) -> FieldCategory {
        self.group().category()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| format!("Unknown field: '{s}'"))
    }
}

/// Totals the calculation engine derives from leaf fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivedField {
    #[serde(rename = "totalIncome")]
    TotalIncome,
    #[serde(rename = "totalCOGS")]
    TotalCogs,
    #[serde(rename = "grossProfit")]
    GrossProfit,
    #[serde(rename = "totalExpenses")]
    TotalExpenses,
    #[serde(rename = "netOrdinaryIncome")]
    NetOrdinaryIncome,
    #[serde(rename = "netIncome")]
    NetIncome,
}

impl DerivedField {
    pub const ALL: [DerivedField; 6] = [
        DerivedField::TotalIncome,
        DerivedField::TotalCogs,
        DerivedField::GrossProfit,
        DerivedField::TotalExpenses,
        DerivedField::NetOrdinaryIncome,
        DerivedField::NetIncome,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DerivedField::TotalIncome => "totalIncome",
            DerivedField::TotalCogs => "totalCOGS",
            DerivedField::GrossProfit => "grossProfit",
            DerivedField::TotalExpenses => "totalExpenses",
            DerivedField::NetOrdinaryIncome => "netOrdinaryIncome",
            DerivedField::NetIncome => "netIncome",
        }
    }
}

impl fmt::Display for DerivedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
