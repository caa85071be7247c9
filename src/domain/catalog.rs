//! Static plate and location catalogs shared by the simulator and the facility view

/// License plates the simulator draws vehicle identities from
pub const PLATES: [&str; 45] = [
    "29A-12345", "29A-54321", "29A-67890", "29A-11111", "29A-99999",
    "30B-12345", "30B-67890", "30B-33333", "30B-88888", "30B-55555",
    "51C-11111", "51C-22222", "51C-44444", "51C-77777", "51C-12121",
    "59D-98765", "59D-45678", "59D-13579", "59D-24680", "59D-86420",
    "79D-99999", "79D-10101", "79D-20202", "79D-30303", "79D-40404",
    "92E-54321", "92E-65432", "92E-76543", "92E-87654", "92E-98765",
    "15F-88888", "15F-11122", "15F-33344", "15F-55566", "15F-77788",
    "43G-22222", "43G-12389", "43G-45612", "43G-78945", "43G-32165",
    "60H-10203", "60H-40506", "60H-70809", "60H-20406", "60H-50810",
];

/// Floor labels, bottom to top. Floor F is the VIP deck.
pub const FLOORS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];

/// Bays per floor
pub const BAYS_PER_FLOOR: usize = 10;

/// Parking locations, ten bays per floor
pub const LOCATIONS: [&str; 60] = [
    "A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8", "A9", "A10",
    "B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B9", "B10",
    "C1", "C2", "C3", "C4", "C5", "C6", "C7", "C8", "C9", "C10",
    "D1", "D2", "D3", "D4", "D5", "D6", "D7", "D8", "D9", "D10",
    "E1", "E2", "E3", "E4", "E5", "E6", "E7", "E8", "E9", "E10",
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10",
];
