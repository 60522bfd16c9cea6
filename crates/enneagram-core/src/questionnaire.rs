use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::scoring::{score, ResultFragment};
use crate::{AnswerSet, CoreError, TypeSlot};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct QuestionnaireItem {
    pub id: u32,
    pub text: String,
    pub type_slot: TypeSlot,
}

/// Display data bound to one type slot.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TypeProfile {
    pub name: String,
    pub archetype: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Slot to archetype mapping. Must cover every slot before it can be used for scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct ArchetypeTable(BTreeMap<TypeSlot, TypeProfile>);

impl ArchetypeTable {
    #[must_use]
    pub fn new(profiles: BTreeMap<TypeSlot, TypeProfile>) -> Self {
        Self(profiles)
    }

    /// # Errors
    /// Returns [`CoreError::MalformedInput`] when the slot has no configured archetype.
    pub fn profile(&self, slot: TypeSlot) -> Result<&TypeProfile, CoreError> {
        self.0.get(&slot).ok_or_else(|| {
            CoreError::MalformedInput(format!("no archetype configured for type slot {slot}"))
        })
    }

    /// # Errors
    /// Returns [`CoreError::MalformedInput`] naming the first uncovered slot or blank label.
    pub fn validate(&self) -> Result<(), CoreError> {
        for slot in TypeSlot::all() {
            let profile = self.profile(slot)?;
            if profile.archetype.trim().is_empty() {
                return Err(CoreError::MalformedInput(format!(
                    "archetype label for type slot {slot} MUST be non-empty"
                )));
            }
        }
        Ok(())
    }
}

/// Immutable item set plus archetype table.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Questionnaire {
    items: Vec<QuestionnaireItem>,
    archetypes: ArchetypeTable,
}

impl Questionnaire {
    /// # Errors
    /// Returns [`CoreError::MalformedInput`] for duplicate item ids, blank item text,
    /// or an archetype table that does not cover all nine slots.
    pub fn new(
        items: Vec<QuestionnaireItem>,
        archetypes: ArchetypeTable,
    ) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        for item in &items {
            if !seen.insert(item.id) {
                return Err(CoreError::MalformedInput(format!(
                    "duplicate questionnaire item id {}",
                    item.id
                )));
            }
            if item.text.trim().is_empty() {
                return Err(CoreError::MalformedInput(format!(
                    "questionnaire item {} MUST have text",
                    item.id
                )));
            }
        }
        archetypes.validate()?;
        Ok(Self { items, archetypes })
    }

    #[must_use]
    pub fn items(&self) -> &[QuestionnaireItem] {
        &self.items
    }

    #[must_use]
    pub fn archetypes(&self) -> &ArchetypeTable {
        &self.archetypes
    }

    /// Score a complete answer set against this questionnaire.
    ///
    /// # Errors
    /// Returns [`CoreError::MalformedInput`] when the answer set is incomplete or
    /// references items that are not part of this questionnaire.
    pub fn score(&self, answers: &AnswerSet) -> Result<ResultFragment, CoreError> {
        if let Some(unknown) =
            answers.item_ids().find(|id| !self.items.iter().any(|item| item.id == *id))
        {
            return Err(CoreError::MalformedInput(format!(
                "answer references unknown questionnaire item {unknown}"
            )));
        }
        score(answers, &self.items, &self.archetypes)
    }

    /// The 18-item questionnaire shipped with the application, two items per slot.
    ///
    /// # Errors
    /// Only fails if the embedded tables are inconsistent.
    pub fn builtin() -> Result<Self, CoreError> {
        let items = BUILTIN_ITEMS
            .iter()
            .map(|(id, slot, text)| {
                Ok(QuestionnaireItem {
                    id: *id,
                    text: (*text).to_string(),
                    type_slot: TypeSlot::new(*slot)?,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let mut profiles = BTreeMap::new();
        for (slot, archetype, strengths, weaknesses) in BUILTIN_PROFILES {
            let slot = TypeSlot::new(*slot)?;
            profiles.insert(
                slot,
                TypeProfile {
                    name: format!("Tipo {slot}"),
                    archetype: (*archetype).to_string(),
                    strengths: strengths.iter().map(|value| (*value).to_string()).collect(),
                    weaknesses: weaknesses.iter().map(|value| (*value).to_string()).collect(),
                },
            );
        }

        Self::new(items, ArchetypeTable::new(profiles))
    }
}

const BUILTIN_ITEMS: &[(u32, u8, &str)] = &[
    (1, 1, "Sou movido(a) por fazer a coisa certa e evitar erros."),
    (2, 3, "Procuro ser bem-sucedido(a) e ser visto(a) como competente."),
    (3, 2, "Sou empático(a) e procuro ajudar os outros antes de mim."),
    (4, 4, "Procuro autenticidade e expressar minha individualidade."),
    (5, 5, "Valorizo o conhecimento e a reflexão independente."),
    (6, 6, "Busco segurança e às vezes me preocupo com riscos."),
    (7, 7, "Gosto de planejar experiências positivas e evitar dor."),
    (8, 8, "Tenho uma postura assertiva e gosto de controle."),
    (9, 9, "Busco paz e evito conflitos para manter a harmonia."),
    (10, 1, "Minha integridade e meus padrões morais guiam minhas decisões."),
    (11, 3, "Sou competitivo(a) e gosto de metas claras para dirigir meu esforço."),
    (12, 2, "Sou cuidadoso(a) com os sentimentos dos outros e busco conexão."),
    (13, 4, "Tenho tendência à introspecção e valorizo o belo."),
    (14, 5, "Gosto de entender como as coisas funcionam antes de agir."),
    (15, 6, "Tomo precauções e busco respaldo em regras e planos."),
    (16, 7, "Tenho energia para criar possibilidades e manter o ânimo."),
    (17, 8, "Sinto que posso liderar e proteger meu círculo quando preciso."),
    (18, 9, "Sinto-me confortável seguindo o fluxo para evitar desgaste."),
];

type ProfileRow = (u8, &'static str, &'static [&'static str], &'static [&'static str]);

const BUILTIN_PROFILES: &[ProfileRow] = &[
    (
        1,
        "O Perfeccionista",
        &["Consciencioso e ético", "Busca a excelência"],
        &["Autocrítico", "Rigidez em excesso"],
    ),
    (
        2,
        "O Ajudador",
        &["Empático e solidário", "Constrói conexões"],
        &["Busca aprovação", "Dificuldade em dizer não"],
    ),
    (
        3,
        "O Realizador",
        &["Focado em resultados", "Adaptável e persuasivo"],
        &["Excessiva preocupação com imagem", "Impaciência emocional"],
    ),
    (
        4,
        "O Individualista",
        &["Autêntico e criativo", "Sensível às nuances emocionais"],
        &["Sentimento de inadequação", "Oscilações emocionais"],
    ),
    (
        5,
        "O Investigador",
        &["Analítico e independente", "Busca conhecimento profundo"],
        &["Isolamento", "Dificuldade em expressar emoções"],
    ),
    (
        6,
        "O Leal",
        &["Leal e responsável", "Planejador atento a riscos"],
        &["Ansiedade", "Tendência a duvidar"],
    ),
    (
        7,
        "O Entusiasta",
        &["Otimista e enérgico", "Criativo em soluções"],
        &["Evasão de dor", "Falta de foco prolongado"],
    ),
    (
        8,
        "O Desafiador",
        &["Assertivo e protetor", "Tomada de decisão rápida"],
        &["Dominância", "Dificuldade em mostrar vulnerabilidade"],
    ),
    (
        9,
        "O Pacificador",
        &["Calmo e conciliador", "Estabilidade emocional"],
        &["Inércia", "Evita confrontos necessários"],
    ),
];
