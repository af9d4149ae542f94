use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use tracing::debug;

pub use crate::entities::order::ShippingType as ShippingZone;

/// Colombian departments and the cities the store delivers to.
static DESTINATIONS: &[(&str, &[&str])] = &[
    ("Amazonas", &["Leticia", "Puerto Nariño"]),
    (
        "Antioquia",
        &[
            "Medellín",
            "Bello",
            "Itagüí",
            "Envigado",
            "Sabaneta",
            "La Estrella",
            "Caldas",
            "Copacabana",
            "Girardota",
            "Barbosa",
            "Rionegro",
            "Marinilla",
            "La Ceja",
            "El Retiro",
            "Guarne",
            "El Carmen de Viboral",
            "Santa Fe de Antioquia",
            "Apartadó",
            "Turbo",
            "Caucasia",
            "Yarumal",
            "Puerto Berrío",
            "Santa Rosa de Osos",
            "Andes",
            "Jardín",
        ],
    ),
    ("Arauca", &["Arauca", "Saravena", "Tame"]),
    (
        "Atlántico",
        &["Barranquilla", "Soledad", "Malambo", "Puerto Colombia", "Sabanalarga"],
    ),
    ("Bogotá D.C.", &["Bogotá"]),
    ("Bolívar", &["Cartagena", "Magangué", "Turbaco", "El Carmen de Bolívar"]),
    (
        "Boyacá",
        &["Tunja", "Duitama", "Sogamoso", "Chiquinquirá", "Paipa", "Villa de Leyva"],
    ),
    ("Caldas", &["Manizales", "La Dorada", "Chinchiná", "Villamaría", "Riosucio"]),
    ("Caquetá", &["Florencia", "San Vicente del Caguán"]),
    ("Casanare", &["Yopal", "Aguazul", "Villanueva"]),
    ("Cauca", &["Popayán", "Santander de Quilichao", "Puerto Tejada"]),
    ("Cesar", &["Valledupar", "Aguachica", "Codazzi"]),
    ("Chocó", &["Quibdó", "Istmina", "Bahía Solano"]),
    ("Córdoba", &["Montería", "Cereté", "Lorica", "Sahagún"]),
    (
        "Cundinamarca",
        &[
            "Soacha",
            "Chía",
            "Zipaquirá",
            "Facatativá",
            "Fusagasugá",
            "Girardot",
            "Mosquera",
            "Madrid",
            "Funza",
            "Cajicá",
        ],
    ),
    ("Guainía", &["Inírida"]),
    ("Guaviare", &["San José del Guaviare"]),
    ("Huila", &["Neiva", "Pitalito", "Garzón", "La Plata"]),
    ("La Guajira", &["Riohacha", "Maicao", "Uribia"]),
    ("Magdalena", &["Santa Marta", "Ciénaga", "Fundación"]),
    ("Meta", &["Villavicencio", "Acacías", "Granada", "Puerto López"]),
    ("Nariño", &["Pasto", "Ipiales", "Tumaco", "Túquerres"]),
    ("Norte de Santander", &["Cúcuta", "Ocaña", "Pamplona", "Villa del Rosario"]),
    ("Putumayo", &["Mocoa", "Puerto Asís"]),
    ("Quindío", &["Armenia", "Calarcá", "Montenegro", "Quimbaya"]),
    ("Risaralda", &["Pereira", "Dosquebradas", "Santa Rosa de Cabal", "La Virginia"]),
    ("San Andrés y Providencia", &["San Andrés", "Providencia"]),
    (
        "Santander",
        &["Bucaramanga", "Floridablanca", "Girón", "Piedecuesta", "Barrancabermeja", "Barbosa", "San Gil"],
    ),
    ("Sucre", &["Sincelejo", "Corozal", "Sampués"]),
    ("Tolima", &["Ibagué", "Espinal", "Melgar", "Honda"]),
    (
        "Valle del Cauca",
        &["Cali", "Palmira", "Buenaventura", "Tuluá", "Cartago", "Buga", "Jamundí", "Yumbo"],
    ),
    ("Vaupés", &["Mitú"]),
    ("Vichada", &["Puerto Carreño"]),
];

/// Normalized region name -> (display name, cities)
static REGION_INDEX: Lazy<BTreeMap<String, (&'static str, &'static [&'static str])>> =
    Lazy::new(|| {
        DESTINATIONS
            .iter()
            .map(|(region, cities)| (normalize_place(region), (*region, *cities)))
            .collect()
    });

/// Lower-cases and strips Spanish diacritics so "MEDELLIN" matches "Medellín".
pub fn normalize_place(name: &str) -> String {
    name.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Answers "which cities belong to this department" and "is this destination
/// inside the cash-on-delivery region".
#[derive(Debug, Clone)]
pub struct ShippingLocator {
    cod_region: String,
}

impl Default for ShippingLocator {
    fn default() -> Self {
        Self::new("Antioquia")
    }
}

impl ShippingLocator {
    pub fn new(cod_region: impl Into<String>) -> Self {
        Self {
            cod_region: cod_region.into(),
        }
    }

    pub fn cod_region(&self) -> &str {
        &self.cod_region
    }

    /// All region names, sorted.
    pub fn regions(&self) -> Vec<&'static str> {
        let mut regions: Vec<&'static str> = DESTINATIONS.iter().map(|(name, _)| *name).collect();
        regions.sort_by_key(|name| normalize_place(name));
        regions
    }

    /// Canonical display name of a region, if it is known.
    pub fn canonical_region(&self, region: &str) -> Option<&'static str> {
        REGION_INDEX
            .get(&normalize_place(region))
            .map(|(name, _)| *name)
    }

    /// Cities of a region; empty for unknown regions.
    pub fn cities_of(&self, region: &str) -> &'static [&'static str] {
        REGION_INDEX
            .get(&normalize_place(region))
            .map(|(_, cities)| *cities)
            .unwrap_or(&[])
    }

    /// Canonical spelling of `city` within `region`, if the city belongs to it.
    pub fn find_city(&self, region: &str, city: &str) -> Option<&'static str> {
        let wanted = normalize_place(city);
        self.cities_of(region)
            .iter()
            .copied()
            .find(|candidate| normalize_place(candidate) == wanted)
    }

    fn is_cod_region(&self, region: &str) -> bool {
        normalize_place(region) == normalize_place(&self.cod_region)
    }

    /// Whether payment can be collected at delivery.
    ///
    /// With a region the answer depends only on the region. Without one, the
    /// city name alone is looked up in the COD region's city list; names shared
    /// with other departments (e.g. Barbosa, Caldas) resolve to eligible.
    pub fn is_cod_eligible(&self, city: &str, region: Option<&str>) -> bool {
        match region {
            Some(region) => self.is_cod_region(region),
            None => {
                let eligible = self.find_city(&self.cod_region, city).is_some();
                debug!(
                    city,
                    eligible, "COD eligibility resolved by city name without a region"
                );
                eligible
            }
        }
    }

    /// Region-qualified zone lookup used by checkout.
    pub fn zone_for(&self, city: &str, region: &str) -> ShippingZone {
        if self.is_cod_region(region) && self.find_city(region, city).is_some() {
            ShippingZone::RegionalCod
        } else {
            ShippingZone::Nationwide
        }
    }
}
