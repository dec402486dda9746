//! 对话场景：标签、问候语与系统指令

use std::fmt;

/// 学科（Studies 场景）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subject {
    Mathematics,
    Physics,
    Chemistry,
    Biology,
    English,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::Mathematics,
        Subject::Physics,
        Subject::Chemistry,
        Subject::Biology,
        Subject::English,
    ];

    fn slug(self) -> &'static str {
        match self {
            Subject::Mathematics => "mathematics",
            Subject::Physics => "physics",
            Subject::Chemistry => "chemistry",
            Subject::Biology => "biology",
            Subject::English => "english",
        }
    }
}

/// 对话场景；标签随每轮请求发给网关，决定是否启用搜索
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatContext {
    General,
    Studies(Subject),
    FinancialMarkets,
    /// 未知标签：原样透传，没有专属问候语
    Custom(String),
}

impl ChatContext {
    pub const FINANCIAL_MARKETS_TAG: &'static str = "studies-financialmarkets";

    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim();
        if tag.eq_ignore_ascii_case("general") {
            return ChatContext::General;
        }
        if tag.eq_ignore_ascii_case(Self::FINANCIAL_MARKETS_TAG) {
            return ChatContext::FinancialMarkets;
        }
        Subject::ALL
            .iter()
            .find(|s| {
                tag.strip_prefix("studies-")
                    .is_some_and(|rest| rest.eq_ignore_ascii_case(s.slug()))
            })
            .map(|&s| ChatContext::Studies(s))
            .unwrap_or_else(|| {
                tracing::warn!("Unknown chat context '{}', sending it as-is", tag);
                ChatContext::Custom(tag.to_string())
            })
    }

    pub fn tag(&self) -> String {
        match self {
            ChatContext::General => "general".to_string(),
            ChatContext::Studies(subject) => format!("studies-{}", subject.slug()),
            ChatContext::FinancialMarkets => Self::FINANCIAL_MARKETS_TAG.to_string(),
            ChatContext::Custom(tag) => tag.clone(),
        }
    }

    /// 场景自带的问候语
    pub fn greeting(&self, name: &str) -> Option<String> {
        let text = match self {
            ChatContext::General => format!(
                "¡Bienvenido a {name}! Soy tu asistente IA de élite, preparado para una amplia gama de tareas: desde generar texto creativo y responder tus preguntas, hasta crear imágenes impactantes y asistirte en tus estudios. Describe tu visión o consulta, y la materializaremos con luz y grandeza."
            ),
            ChatContext::Studies(Subject::Mathematics) => format!(
                "¡Bienvenido a la Suite de Matemáticas de {name}! Estoy aquí para ayudarte a resolver problemas, entender conceptos y explorar el mundo de los números. Por favor, presenta tu consulta o problema matemático."
            ),
            ChatContext::Studies(Subject::Physics) => format!(
                "¡Saludos desde la Suite de Física de {name}! ¿Qué misterios del universo te gustaría desvelar hoy? Desde la mecánica clásica hasta la física cuántica, estoy listo para asistirte."
            ),
            ChatContext::Studies(Subject::Chemistry) => format!(
                "¡Bienvenido al Laboratorio de Química de {name}! ¿Exploramos reacciones, compuestos o principios fundamentales? Presenta tus preguntas."
            ),
            ChatContext::Studies(Subject::Biology) => format!(
                "¡Explora el fascinante mundo de la vida en la Suite de Biología de {name}! Desde la célula hasta los ecosistemas, estoy aquí para ayudarte."
            ),
            ChatContext::Studies(Subject::English) => format!(
                "Hello and welcome to your English learning space with {name}! I'm here to help you master the English language. To start, tell me about your current English level or what you'd like to focus on."
            ),
            ChatContext::FinancialMarkets => format!(
                "Bienvenido a la sección de Mercados Financieros de {name}. Soy tu analista de élite, preparado para proporcionarte datos en tiempo real, análisis técnico y fundamental, resúmenes de noticias y explicaciones detalladas sobre el mundo financiero. Mi objetivo es ofrecerte información precisa y objetiva, sin asesoramiento de inversión. ¿En qué activo, sector o concepto financiero podemos profundizar hoy?"
            ),
            ChatContext::Custom(_) => return None,
        };
        Some(text)
    }
}

impl fmt::Display for ChatContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// 解析后的问候语：覆盖值 > 场景问候语 > 固定兜底
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Greetings {
    /// 打开应用时
    pub initial: String,
    /// 开始新对话时
    pub new_conversation: String,
}

impl Greetings {
    pub fn resolve(name: &str, context: &ChatContext, override_text: Option<&str>) -> Self {
        let chosen = override_text
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| context.greeting(name));
        match chosen {
            Some(text) => Self {
                initial: text.clone(),
                new_conversation: text,
            },
            None => Self {
                initial: format!(
                    "Hola, soy {name}, tu asistente de IA personal de élite. ¿Cómo puedo iluminar tu día hoy?"
                ),
                new_conversation: "Nueva conversación iniciada. Estoy a tu disposición.".to_string(),
            },
        }
    }
}

/// 每次打开会话都会发送的系统指令
pub fn system_instruction(name: &str) -> String {
    format!(
        r#"Eres '{name}', un asistente de IA de élite multifuncional que opera en distintos espacios de trabajo: "{name}" (general), "Estudios" (Matemáticas, Física, Química, Biología, Inglés) y "Mercados Financieros". Obedece las órdenes del usuario con la máxima profesionalidad y mantén un tono sofisticado, directo y adaptado al contexto activo (académico, pedagógico o de análisis financiero). La información del mundo real y los eventos actuales deben obtenerse con tu herramienta de búsqueda (Google Search); las fuentes se mostrarán al usuario.

Cada mensaje del usuario puede llegar precedido de su contexto (chatContext). En Estudios actúa como tutor experto: soluciones paso a paso, precisión absoluta y claridad conceptual. En Inglés actúa como tutor amable e interactivo que evalúa el nivel y corrige con tacto. En Mercados Financieros actúa como analista de élite, con datos precisos y sin asesoramiento de inversión.

No generas imágenes ni videos directamente. Cuando una acción requiera aprobación del usuario, termina tu respuesta EXACTAMENTE con una de estas frases, sin texto adicional después:
1. Imagen a partir de texto: "Confirmar generación de imagen: [descripción detallada aquí]. ¿Sí o no?"
2. Imagen combinada o modificación basada en imágenes de referencia: "Confirmar generación de imagen combinada: [descripción detallada de la nueva imagen aquí]. ¿Sí o no?"
3. Plan de video: "Confirmar generación del plan de video: [resumen del concepto del video aquí]. ¿Sí o no?"

Si el usuario acepta un plan de video, entrega un plan detallado (concepto, guion por escenas, estilo visual, música y duración estimada)."#
    )
}
